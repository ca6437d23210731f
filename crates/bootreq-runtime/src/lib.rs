//! Host-facing machinery for bootreq.
//!
//! This crate drives external programs: the `IsolationTool` trait with a
//! virtualenv implementation (provisioned on demand from a fetched payload)
//! and a mock, the `Installer` trait with a pip driver, the `Fetcher` trait
//! with curl and built-in HTTP clients plus `fetch_and_pipe`, the
//! `ActiveEnvProbe` that decides whether the current environment already
//! satisfies a script, the `ProcessLauncher` that re-runs the original
//! invocation inside a built environment, and host prerequisite checks.

pub mod fetch;
pub mod installer;
pub mod isolation;
pub mod launch;
pub mod mock;
pub mod prereq;
pub mod probe;

pub use fetch::{fetch_and_pipe, select_fetcher, CurlFetcher, Fetcher, HttpFetcher};
pub use installer::{select_installer, Installer, PipInstaller};
pub use isolation::{select_isolation, IsolationTool, Virtualenv};
pub use launch::{
    exit_code, foreground_child, run_script, Invocation, Launcher, ProcessLauncher, ENV_ACTIVE,
    ENV_RELAUNCH,
};
pub use prereq::{check_host_prereqs, format_missing, MissingPrereq};
pub use probe::{ActiveEnv, ActiveEnvProbe, CheckFailure, SatisfactionProbe};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] bootreq_store::StoreError),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("interpreter '{0}' not found on PATH")]
    InterpreterNotFound(String),
    #[error("failed to provision {tool}: {reason}")]
    ToolProvisionFailed { tool: String, reason: String },
    #[error("environment creation failed{}:\n{output}", fmt_code(*.code))]
    EnvCreateFailed { code: Option<i32>, output: String },
    #[error("installer failed{}:\n{output}", fmt_code(*.code))]
    InstallFailed { code: Option<i32>, output: String },
    #[error("fetching {url} failed{}: {reason}", fmt_code(*.code))]
    FetchFailed {
        url: String,
        code: Option<i32>,
        reason: String,
    },
    #[error("fetched payload from {0} is empty")]
    EmptyPayload(String),
    #[error("execution failed: {0}")]
    ExecFailed(String),
}

fn fmt_code(code: Option<i32>) -> String {
    match code {
        Some(c) => format!(" with exit code {c}"),
        None => String::new(),
    }
}
