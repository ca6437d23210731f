//! Core orchestration for bootreq.
//!
//! This crate ties together schema parsing, the environment store, and the
//! runtime drivers into the `Engine`, which resolves or builds the environment
//! for a requirement set, and the `Controller`, which walks a script through
//! checking, tool bootstrap, environment build, and relaunch. It also provides
//! the stage transition table and interrupt handling.

pub mod concurrency;
pub mod controller;
pub mod engine;
pub mod lifecycle;

pub use concurrency::{install_signal_handler, interrupted};
pub use controller::{Controller, HostToolLocator, Outcome, Report, ToolLocator};
pub use engine::{BuildResult, Engine};
pub use lifecycle::{validate_transition, Stage};

use bootreq_runtime::{CheckFailure, RuntimeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid requirement: {0}")]
    Validation(#[from] bootreq_schema::RequirementError),
    #[error("invalid script metadata: {0}")]
    Script(#[from] bootreq_schema::ScriptError),
    #[error("configuration error: {0}")]
    Config(#[from] bootreq_schema::ConfigError),
    #[error("fetch failed: {0}")]
    Fetch(RuntimeError),
    #[error("environment creation failed: {0}")]
    Build(RuntimeError),
    #[error("dependency installation failed: {0}")]
    Install(RuntimeError),
    #[error("relaunch failed: {0}")]
    Relaunch(String),
    #[error("{0}")]
    Unsatisfied(CheckFailure),
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted")]
    Interrupted,
    #[error("store error: {0}")]
    Store(#[from] bootreq_store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The controller stage this error belongs to, if it belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CoreError::Unsatisfied(_) => Some(Stage::Checking),
            CoreError::Fetch(_) => Some(Stage::BootstrappingTool),
            CoreError::Build(_) | CoreError::Install(_) | CoreError::Interrupted => {
                Some(Stage::BuildingEnv)
            }
            CoreError::Relaunch(_) => Some(Stage::Relaunching),
            _ => None,
        }
    }

    /// Process exit code for this error.
    ///
    /// A failed fetch, environment creation or install exits with the
    /// failing program's own code. Invalid input exits 2, an interrupt 130,
    /// anything else 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Fetch(RuntimeError::FetchFailed {
                code: Some(code), ..
            })
            | CoreError::Build(RuntimeError::EnvCreateFailed {
                code: Some(code), ..
            })
            | CoreError::Install(RuntimeError::InstallFailed {
                code: Some(code), ..
            }) if *code != 0 => *code,
            CoreError::Validation(_) | CoreError::Script(_) | CoreError::Config(_) => 2,
            CoreError::Interrupted => 130,
            _ => 1,
        }
    }
}
