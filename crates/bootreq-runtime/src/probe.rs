use crate::launch::ENV_ACTIVE;
use bootreq_schema::{normalize_name, Fingerprint, RequirementSet};
use bootreq_store::{env_interpreter, EnvMetadata};
use pep440_rs::{Version, VersionSpecifiers};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// The environment a satisfied script runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveEnv {
    /// Environment root, or `None` when the host interpreter is used directly.
    pub root: Option<PathBuf>,
    pub interpreter: PathBuf,
}

/// Why the current environment does not satisfy a requirement set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckFailure {
    #[error("no active environment")]
    NoEnvironment,
    #[error("required package '{name}' is not installed")]
    Missing { name: String },
    #[error("installed {name} {installed} does not satisfy '{wanted}'")]
    VersionConflict {
        name: String,
        installed: String,
        wanted: String,
    },
    #[error("active environment {path} cannot be read: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

impl CheckFailure {
    /// Whether this failure is something building an environment can fix.
    pub fn triggers_bootstrap(&self) -> bool {
        matches!(
            self,
            CheckFailure::NoEnvironment
                | CheckFailure::Missing { .. }
                | CheckFailure::VersionConflict { .. }
        )
    }
}

/// Decides whether the running environment satisfies a requirement set.
pub trait SatisfactionProbe: Send + Sync {
    fn check(
        &self,
        requirements: &RequirementSet,
        fingerprint: &Fingerprint,
    ) -> Result<ActiveEnv, CheckFailure>;
}

/// Inspects the environment named by `BOOTREQ_ENV` or `VIRTUAL_ENV` on disk.
/// Never spawns a process.
#[derive(Debug, Clone)]
pub struct ActiveEnvProbe {
    active: Option<PathBuf>,
    host_python: String,
}

impl ActiveEnvProbe {
    pub fn new(active: Option<PathBuf>, host_python: impl Into<String>) -> Self {
        Self {
            active,
            host_python: host_python.into(),
        }
    }

    /// Read the active environment from the process environment.
    pub fn from_env(host_python: impl Into<String>) -> Self {
        let active = [ENV_ACTIVE, "VIRTUAL_ENV"]
            .iter()
            .filter_map(std::env::var_os)
            .find(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new(active, host_python)
    }

    pub fn active(&self) -> Option<&Path> {
        self.active.as_deref()
    }
}

impl SatisfactionProbe for ActiveEnvProbe {
    fn check(
        &self,
        requirements: &RequirementSet,
        fingerprint: &Fingerprint,
    ) -> Result<ActiveEnv, CheckFailure> {
        let host = || {
            if requirements.is_empty() {
                Ok(ActiveEnv {
                    root: None,
                    interpreter: PathBuf::from(&self.host_python),
                })
            } else {
                Err(CheckFailure::NoEnvironment)
            }
        };
        let Some(root) = self.active.as_deref() else {
            return host();
        };

        let unreadable = |e: &dyn std::fmt::Display| CheckFailure::Unreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        };

        match fs::read_dir(root) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("active environment {} no longer exists", root.display());
                return host();
            }
            Err(e) => return Err(unreadable(&e)),
        }
        let active = ActiveEnv {
            root: Some(root.to_path_buf()),
            interpreter: env_interpreter(root),
        };

        if let Ok(Some(meta)) = EnvMetadata::read_marker(root) {
            if meta.fingerprint == *fingerprint {
                debug!("active environment {} carries a matching marker", meta.short_id);
                return Ok(active);
            }
        }

        let installed = installed_distributions(root).map_err(|e| unreadable(&e))?;
        for req in requirements {
            if req.has_marker() {
                continue;
            }
            let Some(version) = installed.get(req.name()) else {
                return Err(CheckFailure::Missing {
                    name: req.name().to_owned(),
                });
            };
            if req.is_url() {
                continue;
            }
            let (Some(wanted), Some(installed)) = (req.specifiers(), version.as_deref()) else {
                continue;
            };
            if !version_satisfies(installed, wanted) {
                return Err(CheckFailure::VersionConflict {
                    name: req.name().to_owned(),
                    installed: installed.to_owned(),
                    wanted: wanted.to_owned(),
                });
            }
        }
        Ok(active)
    }
}

fn version_satisfies(installed: &str, wanted: &str) -> bool {
    match (
        VersionSpecifiers::from_str(wanted),
        Version::from_str(installed),
    ) {
        (Ok(specifiers), Ok(version)) => specifiers.contains(&version),
        _ => false,
    }
}

/// Every `site-packages` directory of the environment at `root`.
fn site_packages_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let lib = root.join("lib");
    if lib.is_dir() {
        for entry in fs::read_dir(&lib)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with("python") {
                let site = entry.path().join("site-packages");
                if site.is_dir() {
                    dirs.push(site);
                }
            }
        }
    }
    let windows_site = root.join("Lib").join("site-packages");
    if windows_site.is_dir() {
        dirs.push(windows_site);
    }
    Ok(dirs)
}

/// Installed distributions by normalized name, with their versions when known.
fn installed_distributions(root: &Path) -> io::Result<HashMap<String, Option<String>>> {
    let mut found = HashMap::new();
    for site in site_packages_dirs(root)? {
        for entry in fs::read_dir(&site)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some((dist, version)) = parse_dist_dir(&name) {
                found.insert(normalize_name(dist), version.map(str::to_owned));
            }
        }
    }
    Ok(found)
}

/// Split `name-1.0.dist-info` or `name-1.0-py3.11.egg-info` into name and version.
fn parse_dist_dir(file_name: &str) -> Option<(&str, Option<&str>)> {
    if let Some(stem) = file_name.strip_suffix(".dist-info") {
        let (name, version) = stem.rsplit_once('-')?;
        return Some((name, Some(version)));
    }
    if let Some(stem) = file_name.strip_suffix(".egg-info") {
        let mut parts = stem.splitn(3, '-');
        let name = parts.next().filter(|n| !n.is_empty())?;
        return Some((name, parts.next()));
    }
    None
}
