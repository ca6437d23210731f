pub mod build;
pub mod check;
pub mod completions;
pub mod doctor;
pub mod fingerprint;
pub mod list;
pub mod man_pages;
pub mod prune;
pub mod run;

use bootreq_core::{CoreError, Stage};
use bootreq_schema::{parse_script_file, Config, ConfigOverrides, RequirementSet, ScriptMetadata};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USAGE: u8 = 2;

/// A command failure and the code the process exits with.
#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
}

impl CliError {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(EXIT_FAILURE, message)
    }
}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        let message = match e.stage() {
            Some(stage) if stage != Stage::Checking => {
                format!("bootstrapping failed during {stage}: {e}")
            }
            _ => e.to_string(),
        };
        Self::new(exit_byte(e.exit_code()), message)
    }
}

impl From<bootreq_schema::ScriptError> for CliError {
    fn from(e: bootreq_schema::ScriptError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<bootreq_schema::RequirementError> for CliError {
    fn from(e: bootreq_schema::RequirementError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<bootreq_schema::ConfigError> for CliError {
    fn from(e: bootreq_schema::ConfigError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<bootreq_store::StoreError> for CliError {
    fn from(e: bootreq_store::StoreError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self::failure(message)
    }
}

/// Clamp a child or error exit code into the byte a process can return.
pub fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_FAILURE)
}

/// Configuration that can be set from the command line. Takes precedence
/// over every other layer.
#[derive(Debug, Default, Args)]
pub struct ConfigFlags {
    /// Base interpreter used to create environments.
    #[arg(long, value_name = "PROGRAM")]
    pub python: Option<String>,
    /// Package index URL.
    #[arg(long, value_name = "URL")]
    pub index_url: Option<String>,
    /// Host to trust even without valid HTTPS.
    #[arg(long, value_name = "HOST")]
    pub trusted_host: Option<String>,
    /// Isolation backend (virtualenv or mock).
    #[arg(long)]
    pub backend: Option<String>,
    /// Download method for bootstrap payloads (curl or builtin).
    #[arg(long)]
    pub fetch: Option<String>,
}

impl ConfigFlags {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            python: self.python.clone(),
            index_url: self.index_url.clone(),
            trusted_host: self.trusted_host.clone(),
            backend: self.backend.clone(),
            fetch: self.fetch.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// A script and the extra requirements given for it on the command line.
#[derive(Debug, Args)]
pub struct ScriptArgs {
    /// Script carrying a `# /// script` metadata block.
    pub script: PathBuf,
    /// Additional requirement, on top of the inline ones (repeatable).
    #[arg(long = "with", value_name = "REQ")]
    pub with: Vec<String>,
    #[command(flatten)]
    pub config: ConfigFlags,
}

/// Process-wide inputs shared by every command.
pub struct Context {
    pub store: Option<PathBuf>,
    /// Layer built from leading `KEY:value` argv tokens.
    pub tokens: ConfigOverrides,
    pub json: bool,
}

impl Context {
    pub fn store_root(&self) -> Result<&Path, CliError> {
        self.store.as_deref().ok_or_else(|| {
            CliError::failure("cannot determine the store directory; set BOOTREQ_STORE or --store")
        })
    }

    /// Resolve configuration: defaults, config file, script table, argv
    /// tokens, then command-line flags.
    pub fn config(
        &self,
        script: Option<&ScriptMetadata>,
        flags: &ConfigFlags,
    ) -> Result<Config, CliError> {
        let file = ConfigOverrides::load_default()?;
        let script_layer = script.map(|m| m.overrides.clone()).unwrap_or_default();
        let flag_layer = flags.overrides();
        Ok(Config::resolve(&[&file, &script_layer, &self.tokens, &flag_layer])?)
    }

    /// Read a script's inline metadata and resolve its requirements and configuration.
    pub fn load(
        &self,
        args: &ScriptArgs,
    ) -> Result<(ScriptMetadata, RequirementSet, Config), CliError> {
        let meta = parse_script_file(&args.script)?;
        let requirements = RequirementSet::parse(meta.dependencies.iter().chain(&args.with))?;
        let config = self.config(Some(&meta), &args.config)?;
        Ok((meta, requirements, config))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Print a `bootreq:` status line to stderr.
pub fn status(msg: &str) {
    eprintln!("{} {msg}", console::style("bootreq:").for_stderr().cyan().bold());
}

pub fn report_error(msg: &str) {
    eprintln!(
        "{} {msg}",
        console::style("bootreq: error:").for_stderr().red().bold()
    );
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "complete" => Style::new().green().apply_to(state).to_string(),
        "incomplete" => Style::new().yellow().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Shows controller stages on stderr. Building gets a spinner when stderr
/// is a terminal; every other stage is a plain status line.
pub struct StageProgress {
    current: RefCell<Option<ProgressBar>>,
    interactive: bool,
}

impl Default for StageProgress {
    fn default() -> Self {
        Self {
            current: RefCell::new(None),
            interactive: console::Term::stderr().is_term(),
        }
    }
}

impl StageProgress {
    pub fn update(&self, stage: Stage, msg: &str) {
        self.settle(true);
        if stage == Stage::BuildingEnv && self.interactive {
            *self.current.borrow_mut() = Some(spinner(&format!("bootreq: {msg}")));
        } else {
            status(msg);
        }
    }

    pub fn finish(&self, ok: bool) {
        self.settle(ok);
    }

    fn settle(&self, ok: bool) {
        if let Some(pb) = self.current.borrow_mut().take() {
            let msg = pb.message();
            if ok {
                spin_ok(&pb, &msg);
            } else {
                spin_fail(&pb, &msg);
            }
        }
    }
}
