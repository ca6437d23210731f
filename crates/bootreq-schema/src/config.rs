use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";
pub const DEFAULT_BACKEND: &str = "virtualenv";
pub const DEFAULT_VIRTUALENV_VERSION: &str = "20.26.6";
pub const DEFAULT_VIRTUALENV_URL: &str = "https://bootstrap.pypa.io/get-pip.py";
pub const DEFAULT_BOOTSTRAP_URL: &str =
    "https://raw.githubusercontent.com/marcoallegretti/bootreq/main/bootstrap.sh";
pub const DEFAULT_BOOTSTRAP_INTERPRETER: &str = "sh";
pub const DEFAULT_FETCH: &str = "curl";

const BACKENDS: &[&str] = &["virtualenv", "mock"];
const FETCHERS: &[&str] = &["curl", "builtin"];

/// Keys accepted in `KEY:value` argv tokens, in the order [`Config::to_tokens`] emits them.
pub const TOKEN_KEYS: &[&str] = &[
    "python",
    "index_url",
    "trusted_host",
    "pip_options",
    "backend",
    "virtualenv_version",
    "virtualenv_url",
    "bootstrap_url",
    "bootstrap_interpreter",
    "fetch",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("{key} is not a valid URL: '{value}' ({reason})")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid value for {key}: '{value}', expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: String,
    },
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Resolved configuration for one invocation.
///
/// Built once from defaults plus override layers and not mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub python: String,
    pub index_url: String,
    pub trusted_host: Option<String>,
    pub pip_options: Vec<String>,
    pub backend: String,
    pub virtualenv_version: String,
    pub virtualenv_url: String,
    pub bootstrap_url: String,
    pub bootstrap_interpreter: String,
    pub fetch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: DEFAULT_PYTHON.to_owned(),
            index_url: DEFAULT_INDEX_URL.to_owned(),
            trusted_host: None,
            pip_options: Vec::new(),
            backend: DEFAULT_BACKEND.to_owned(),
            virtualenv_version: DEFAULT_VIRTUALENV_VERSION.to_owned(),
            virtualenv_url: DEFAULT_VIRTUALENV_URL.to_owned(),
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_owned(),
            bootstrap_interpreter: DEFAULT_BOOTSTRAP_INTERPRETER.to_owned(),
            fetch: DEFAULT_FETCH.to_owned(),
        }
    }
}

/// A partial configuration layer. Unset fields leave the lower layer in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pip_options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualenv_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualenv_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<String>,
}

impl Config {
    /// Apply override layers, lowest precedence first, and validate the result.
    pub fn resolve(layers: &[&ConfigOverrides]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for layer in layers {
            config.apply(layer);
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, o: &ConfigOverrides) {
        if let Some(ref v) = o.python {
            self.python.clone_from(v);
        }
        if let Some(ref v) = o.index_url {
            self.index_url = v.trim_end_matches('/').to_owned();
        }
        if let Some(ref v) = o.trusted_host {
            self.trusted_host = if v.is_empty() { None } else { Some(v.clone()) };
        }
        if let Some(ref v) = o.pip_options {
            self.pip_options.clone_from(v);
        }
        if let Some(ref v) = o.backend {
            self.backend = v.trim().to_lowercase();
        }
        if let Some(ref v) = o.virtualenv_version {
            self.virtualenv_version = v.trim().to_owned();
        }
        if let Some(ref v) = o.virtualenv_url {
            self.virtualenv_url.clone_from(v);
        }
        if let Some(ref v) = o.bootstrap_url {
            self.bootstrap_url.clone_from(v);
        }
        if let Some(ref v) = o.bootstrap_interpreter {
            self.bootstrap_interpreter.clone_from(v);
        }
        if let Some(ref v) = o.fetch {
            self.fetch = v.trim().to_lowercase();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_url("index_url", &self.index_url)?;
        check_url("virtualenv_url", &self.virtualenv_url)?;
        check_url("bootstrap_url", &self.bootstrap_url)?;
        check_one_of("backend", &self.backend, BACKENDS)?;
        check_one_of("fetch", &self.fetch, FETCHERS)?;
        check_non_empty("python", &self.python)?;
        check_non_empty("virtualenv_version", &self.virtualenv_version)?;
        check_non_empty("bootstrap_interpreter", &self.bootstrap_interpreter)?;
        Ok(())
    }

    /// Host to pass as `--trusted-host`: the explicit setting, else the index
    /// host when the index is served over plain http.
    pub fn effective_trusted_host(&self) -> Option<String> {
        if let Some(ref host) = self.trusted_host {
            return Some(host.clone());
        }
        let url = url::Url::parse(&self.index_url).ok()?;
        if url.scheme() == "http" {
            url.host_str().map(str::to_owned)
        } else {
            None
        }
    }

    /// Encode every field as a `KEY:value` token, for a process that must
    /// rebuild this configuration from its argv.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = vec![
            format!("python:{}", self.python),
            format!("index_url:{}", self.index_url),
        ];
        if let Some(ref host) = self.trusted_host {
            tokens.push(format!("trusted_host:{host}"));
        }
        tokens.extend([
            format!("pip_options:{}", self.pip_options.join(" ")),
            format!("backend:{}", self.backend),
            format!("virtualenv_version:{}", self.virtualenv_version),
            format!("virtualenv_url:{}", self.virtualenv_url),
            format!("bootstrap_url:{}", self.bootstrap_url),
            format!("bootstrap_interpreter:{}", self.bootstrap_interpreter),
            format!("fetch:{}", self.fetch),
        ]);
        tokens
    }
}

impl ConfigOverrides {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `$BOOTREQ_CONFIG`, else `~/.config/bootreq/config.toml`.
    /// A missing file is an empty layer.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Set one field from its token key and textual value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.to_owned();
        match key {
            "python" => self.python = Some(value),
            "index_url" => self.index_url = Some(value),
            "trusted_host" => self.trusted_host = Some(value),
            "pip_options" => {
                self.pip_options = Some(value.split_whitespace().map(str::to_owned).collect());
            }
            "backend" => self.backend = Some(value),
            "virtualenv_version" => self.virtualenv_version = Some(value),
            "virtualenv_url" => self.virtualenv_url = Some(value),
            "bootstrap_url" => self.bootstrap_url = Some(value),
            "bootstrap_interpreter" => self.bootstrap_interpreter = Some(value),
            "fetch" => self.fetch = Some(value),
            other => return Err(ConfigError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }

    /// Consume leading `KEY:value` tokens from `args`.
    ///
    /// Returns the parsed layer and the number of entries consumed. Scanning
    /// stops at the first entry that is not a recognized token; the rest is
    /// left for the wrapped command.
    pub fn split_tokens(args: &[OsString]) -> Result<(Self, usize), ConfigError> {
        let mut overrides = Self::default();
        let mut consumed = 0;
        for arg in args {
            let Some((key, value)) = arg.to_str().and_then(|s| s.split_once(':')) else {
                break;
            };
            if !TOKEN_KEYS.contains(&key) {
                break;
            }
            overrides.set(key, value)?;
            consumed += 1;
        }
        Ok((overrides, consumed))
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("BOOTREQ_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/bootreq/config.toml"))
}

fn check_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            key,
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

fn check_one_of(key: &'static str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            expected: format!("one of: {}", allowed.join(", ")),
        })
    }
}

fn check_non_empty(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            expected: "a non-empty string".to_owned(),
        })
    } else {
        Ok(())
    }
}
