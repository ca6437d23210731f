use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of the bootreq store.
///
/// ```text
/// <root>/version
/// <root>/envs/<fingerprint>/
/// <root>/locks/<fingerprint>.lock
/// <root>/tools/<tool>-<version>/
/// ```
///
/// Subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    #[inline]
    pub fn env_path(&self, fingerprint: &str) -> PathBuf {
        self.envs_dir().join(fingerprint)
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[inline]
    pub fn lock_path(&self, fingerprint: &str) -> PathBuf {
        self.locks_dir().join(format!("{fingerprint}.lock"))
    }

    #[inline]
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    /// Directory holding a provisioned copy of an isolation tool.
    #[inline]
    pub fn tool_path(&self, tool: &str, version: &str) -> PathBuf {
        self.tools_dir().join(format!("{tool}-{version}"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.envs_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        fs::create_dir_all(self.tools_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

/// `$XDG_CACHE_HOME/bootreq`, else `~/.cache/bootreq`.
pub fn default_store_root() -> Option<PathBuf> {
    if let Some(cache) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(cache).join("bootreq"));
    }
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".cache").join("bootreq"))
}
