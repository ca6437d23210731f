use crate::launch::run_captured;
use crate::RuntimeError;
use bootreq_schema::{Config, RequirementSet};
use bootreq_store::env_interpreter;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Populates an environment with a requirement set.
pub trait Installer: Send + Sync {
    fn name(&self) -> &str;

    /// Install `requirements` into the environment at `env_root`.
    ///
    /// Must be idempotent: installing into an environment that already
    /// satisfies the set is a successful no-op.
    fn install(
        &self,
        env_root: &Path,
        requirements: &RequirementSet,
        config: &Config,
    ) -> Result<(), RuntimeError>;
}

/// Runs `<env>/bin/python -m pip install`.
#[derive(Debug, Default)]
pub struct PipInstaller;

/// Arguments after `python -m pip`.
pub fn pip_install_args(requirements: &RequirementSet, config: &Config) -> Vec<String> {
    let mut args = vec!["install".to_owned(), "--disable-pip-version-check".to_owned()];
    args.push("--index-url".to_owned());
    args.push(config.index_url.clone());
    if let Some(host) = config.effective_trusted_host() {
        args.push("--trusted-host".to_owned());
        args.push(host);
    }
    args.extend(config.pip_options.iter().cloned());
    args.extend(requirements.install_args());
    args
}

impl Installer for PipInstaller {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn install(
        &self,
        env_root: &Path,
        requirements: &RequirementSet,
        config: &Config,
    ) -> Result<(), RuntimeError> {
        if requirements.is_empty() {
            debug!("no requirements, skipping pip");
            return Ok(());
        }

        let args = pip_install_args(requirements, config);
        info!("pip {}", args.join(" "));
        let mut cmd = Command::new(env_interpreter(env_root));
        cmd.args(["-m", "pip"])
            .args(&args)
            .env("VIRTUAL_ENV", env_root)
            .env_remove("PYTHONHOME")
            .env_remove("PIP_REQUIRE_VIRTUALENV");
        let (status, output) = run_captured(&mut cmd, None)?;
        if !status.success() {
            return Err(RuntimeError::InstallFailed {
                code: status.code(),
                output: output.trim().to_owned(),
            });
        }
        Ok(())
    }
}

pub fn select_installer(config: &Config) -> Result<Box<dyn Installer>, RuntimeError> {
    match config.backend.as_str() {
        "virtualenv" => Ok(Box::new(PipInstaller)),
        "mock" => Ok(Box::new(crate::mock::MockInstaller)),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
