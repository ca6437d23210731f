use crate::engine::Engine;
use crate::lifecycle::{validate_transition, Stage};
use crate::CoreError;
use bootreq_runtime::{fetch_and_pipe, ActiveEnv, Fetcher, Invocation, Launcher, SatisfactionProbe};
use bootreq_schema::{fingerprint, Config, EnvIdentity, RequirementSet};
use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Provides an engine when the isolation tool can run on this host.
pub trait ToolLocator: Send + Sync {
    /// `Ok(None)` means the tool is unavailable and the cold-start payload
    /// must be fetched instead.
    fn locate(&self, config: &Config) -> Result<Option<Engine>, CoreError>;
}

/// Finds the base interpreter on `PATH` and opens the store at `store_root`.
#[derive(Debug, Clone)]
pub struct HostToolLocator {
    store_root: PathBuf,
}

impl HostToolLocator {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
        }
    }
}

impl ToolLocator for HostToolLocator {
    fn locate(&self, config: &Config) -> Result<Option<Engine>, CoreError> {
        if config.backend != "mock" && which::which(&config.python).is_err() {
            warn!("base interpreter '{}' not found on PATH", config.python);
            return Ok(None);
        }
        Engine::new(&self.store_root, config.clone()).map(Some)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The current environment already satisfies the requirements.
    Satisfied(ActiveEnv),
    /// A child process ran the invocation and exited with this code.
    Exited { code: i32 },
}

/// What a controller run did.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Every stage entered, in order.
    pub path: Vec<Stage>,
    pub identity: EnvIdentity,
    pub outcome: Outcome,
}

/// Drives one invocation from checking to completion.
pub struct Controller<'a> {
    config: Config,
    probe: &'a dyn SatisfactionProbe,
    locator: &'a dyn ToolLocator,
    fetcher: &'a dyn Fetcher,
    launcher: &'a dyn Launcher,
    progress: Option<&'a dyn Fn(Stage, &str)>,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: Config,
        probe: &'a dyn SatisfactionProbe,
        locator: &'a dyn ToolLocator,
        fetcher: &'a dyn Fetcher,
        launcher: &'a dyn Launcher,
    ) -> Self {
        Self {
            config,
            probe,
            locator,
            fetcher,
            launcher,
            progress: None,
        }
    }

    /// Receive a message each time the controller starts a visible step.
    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn Fn(Stage, &str)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn notify(&self, stage: Stage, msg: &str) {
        debug!("[{stage}] {msg}");
        if let Some(progress) = self.progress {
            progress(stage, msg);
        }
    }

    fn advance(path: &mut Vec<Stage>, to: Stage) -> Result<(), CoreError> {
        if let Some(&from) = path.last() {
            validate_transition(from, to)?;
        }
        path.push(to);
        Ok(())
    }

    /// Make `requirements` available to `invocation`.
    ///
    /// When the active environment already satisfies them this returns
    /// [`Outcome::Satisfied`] without starting any process. Otherwise, for a
    /// top-level invocation, the environment is built and the invocation is
    /// re-run inside it, or handed to the fetched bootstrap payload when the
    /// isolation tool is not available. A check failure in a nested
    /// invocation, or one that building cannot fix, is returned unchanged as
    /// [`CoreError::Unsatisfied`].
    pub fn run(
        &self,
        requirements: &RequirementSet,
        invocation: &Invocation,
    ) -> Result<Report, CoreError> {
        let mut path = vec![Stage::Checking];
        let identity = fingerprint(requirements, &self.config);

        let failure = match self.probe.check(requirements, &identity.fingerprint) {
            Ok(active) => {
                Self::advance(&mut path, Stage::Done)?;
                return Ok(Report {
                    path,
                    identity,
                    outcome: Outcome::Satisfied(active),
                });
            }
            Err(failure) => failure,
        };

        if !invocation.entry_point || !failure.triggers_bootstrap() {
            return Err(CoreError::Unsatisfied(failure));
        }
        // The marker is inherited by everything the relaunched script starts,
        // so only the same fingerprint counts as a loop.
        if invocation.relaunched.as_deref() == Some(identity.fingerprint.as_str()) {
            return Err(CoreError::Relaunch(format!(
                "already relaunched for environment {} but still unsatisfied: {failure}",
                identity.short_id
            )));
        }
        self.notify(
            Stage::Checking,
            &format!("missing dependencies ({failure}), bootstrapping environment"),
        );

        Self::advance(&mut path, Stage::BootstrappingTool)?;
        let Some(engine) = self.locator.locate(&self.config)? else {
            self.notify(
                Stage::BootstrappingTool,
                &format!(
                    "isolation tool unavailable, fetching bootstrap from {}",
                    self.config.bootstrap_url
                ),
            );
            let code = fetch_and_pipe(
                self.fetcher,
                &self.config.bootstrap_url,
                &self.config.bootstrap_interpreter,
                &self.bootstrap_args(invocation),
            )
            .map_err(CoreError::Fetch)?;
            Self::advance(&mut path, Stage::Done)?;
            return Ok(Report {
                path,
                identity,
                outcome: Outcome::Exited { code },
            });
        };

        Self::advance(&mut path, Stage::BuildingEnv)?;
        self.notify(
            Stage::BuildingEnv,
            &format!("preparing environment {}", identity.short_id),
        );
        let built = engine.ensure(requirements)?;

        Self::advance(&mut path, Stage::Relaunching)?;
        self.notify(
            Stage::Relaunching,
            &format!("relaunching in {}", built.handle.root.display()),
        );
        let code = self
            .launcher
            .relaunch(invocation, &built.handle)
            .map_err(|e| CoreError::Relaunch(e.to_string()))?;

        Self::advance(&mut path, Stage::Done)?;
        Ok(Report {
            path,
            identity,
            outcome: Outcome::Exited { code },
        })
    }

    /// `-s -- <config tokens> <original arguments>` for the bootstrap interpreter.
    fn bootstrap_args(&self, invocation: &Invocation) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-s".into(), "--".into()];
        args.extend(self.config.to_tokens().into_iter().map(OsString::from));
        args.extend(invocation.arguments().iter().cloned());
        args
    }
}
