use crate::fetch::{select_fetcher, Fetcher};
use crate::launch::run_captured;
use crate::RuntimeError;
use bootreq_schema::Config;
use bootreq_store::{StoreLayout, StoreLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Creates empty isolated environments.
pub trait IsolationTool: Send + Sync {
    fn name(&self) -> &str;

    /// Create an environment at `env_root`, which exists and is empty.
    fn create(&self, env_root: &Path, config: &Config) -> Result<(), RuntimeError>;
}

/// `virtualenv` at a pinned version.
///
/// A copy already importable by the base interpreter is used when it reports
/// the configured version. Otherwise the tool is installed under `tools/` in
/// the store on first use, by piping a fetched `get-pip.py` into the base
/// interpreter with `--target`.
pub struct Virtualenv {
    tool_dir: PathBuf,
    lock_path: PathBuf,
    fetcher: Box<dyn Fetcher>,
}

impl Virtualenv {
    pub fn new(layout: &StoreLayout, config: &Config, fetcher: Box<dyn Fetcher>) -> Self {
        let dir_name = format!("virtualenv-{}", config.virtualenv_version);
        Self {
            tool_dir: layout.tool_path("virtualenv", &config.virtualenv_version),
            lock_path: layout.locks_dir().join(format!("{dir_name}.lock")),
            fetcher,
        }
    }

    pub fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    pub fn is_provisioned(&self) -> bool {
        self.tool_dir.join("virtualenv").is_dir()
    }

    /// True when `python -m virtualenv --version` reports the configured version.
    pub fn host_provides(python: &Path, config: &Config) -> bool {
        let mut cmd = Command::new(python);
        cmd.args(["-m", "virtualenv", "--version"])
            .env_remove("PYTHONPATH")
            .env_remove("PYTHONHOME");
        match run_captured(&mut cmd, None) {
            Ok((status, output)) if status.success() => {
                reports_version(&output, &config.virtualenv_version)
            }
            Ok(_) => false,
            Err(e) => {
                debug!("cannot query host virtualenv: {e}");
                false
            }
        }
    }

    fn provision(&self, python: &Path, config: &Config) -> Result<(), RuntimeError> {
        let _lock = StoreLock::acquire(&self.lock_path)?;
        if self.is_provisioned() {
            return Ok(());
        }

        let tool = format!("virtualenv=={}", config.virtualenv_version);
        let failed = |reason: String| RuntimeError::ToolProvisionFailed {
            tool: tool.clone(),
            reason,
        };

        info!("provisioning {tool} from {}", config.virtualenv_url);
        let payload = self.fetcher.fetch(&config.virtualenv_url)?;
        if payload.is_empty() {
            return Err(RuntimeError::EmptyPayload(config.virtualenv_url.clone()));
        }

        let parent = self
            .tool_dir
            .parent()
            .ok_or_else(|| failed(format!("invalid tool directory {}", self.tool_dir.display())))?;
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".virtualenv-")
            .tempdir_in(parent)?;

        let mut cmd = Command::new(python);
        cmd.arg("-")
            .arg("--quiet")
            .arg("--disable-pip-version-check")
            .arg("--no-warn-script-location")
            .arg("--target")
            .arg(staging.path())
            .arg(&tool);
        let (status, output) = run_captured(&mut cmd, Some(&payload))?;
        if !status.success() {
            return Err(failed(output.trim().to_owned()));
        }

        fs::rename(staging.path(), &self.tool_dir)?;
        debug!("provisioned {tool} in {}", self.tool_dir.display());
        Ok(())
    }
}

impl IsolationTool for Virtualenv {
    fn name(&self) -> &'static str {
        "virtualenv"
    }

    fn create(&self, env_root: &Path, config: &Config) -> Result<(), RuntimeError> {
        let python = which::which(&config.python)
            .map_err(|_| RuntimeError::InterpreterNotFound(config.python.clone()))?;

        let mut cmd = Command::new(&python);
        cmd.args(["-m", "virtualenv", "--quiet", "--no-periodic-update"])
            .arg(env_root)
            .env_remove("PYTHONHOME");
        if !self.is_provisioned() && Self::host_provides(&python, config) {
            debug!(
                "using virtualenv {} found with {}",
                config.virtualenv_version,
                python.display()
            );
            cmd.env_remove("PYTHONPATH");
        } else {
            self.provision(&python, config)?;
            cmd.env("PYTHONPATH", &self.tool_dir);
        }
        let (status, output) = run_captured(&mut cmd, None)?;
        if !status.success() {
            return Err(RuntimeError::EnvCreateFailed {
                code: status.code(),
                output: output.trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// `virtualenv --version` prints `virtualenv <version> from <path>`.
fn reports_version(output: &str, version: &str) -> bool {
    output.lines().any(|line| {
        let mut words = line.split_whitespace();
        words.next() == Some("virtualenv") && words.next() == Some(version)
    })
}

pub fn select_isolation(
    config: &Config,
    layout: &StoreLayout,
) -> Result<Box<dyn IsolationTool>, RuntimeError> {
    match config.backend.as_str() {
        "virtualenv" => Ok(Box::new(Virtualenv::new(
            layout,
            config,
            select_fetcher(config)?,
        ))),
        "mock" => Ok(Box::new(crate::mock::MockIsolation)),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
