use crate::{fsync_dir, StoreError};
use bootreq_schema::{Config, EnvIdentity, Fingerprint, RequirementSet, ShortId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Name of the completion marker inside an environment directory.
///
/// An environment is usable only once this file exists and verifies.
pub const MARKER_FILE: &str = ".bootreq-complete";

/// Contents of the completion marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvMetadata {
    pub fingerprint: Fingerprint,
    pub short_id: ShortId,
    /// Requirement specifiers as declared, in declaration order.
    pub requirements: Vec<String>,
    pub python: String,
    pub index_url: String,
    pub backend: String,
    pub virtualenv_version: String,
    #[serde(default)]
    pub pip_options: Vec<String>,
    pub tool_version: String,
    pub created_at: String,
    /// blake3 checksum over the remaining fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl EnvMetadata {
    pub fn new(identity: &EnvIdentity, requirements: &RequirementSet, config: &Config) -> Self {
        Self {
            fingerprint: identity.fingerprint.clone(),
            short_id: identity.short_id.clone(),
            requirements: requirements.install_args(),
            python: config.python.clone(),
            index_url: config.index_url.clone(),
            backend: config.backend.clone(),
            virtualenv_version: config.virtualenv_version.clone(),
            pip_options: config.pip_options.clone(),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Write the marker into `env_dir` atomically: temp file, fsync, rename,
    /// fsync of the directory.
    pub(crate) fn write_marker(&self, env_dir: &Path) -> Result<(), StoreError> {
        let mut sealed = self.clone();
        sealed.checksum = Some(sealed.compute_checksum()?);
        let content = serde_json::to_string_pretty(&sealed)?;

        let mut tmp = NamedTempFile::new_in(env_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(env_dir.join(MARKER_FILE))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(env_dir)?;
        Ok(())
    }

    /// Read and verify the marker in `env_dir`.
    ///
    /// Returns `Ok(None)` when no marker exists. A marker that does not parse
    /// or whose checksum does not match is an error.
    pub fn read_marker(env_dir: &Path) -> Result<Option<Self>, StoreError> {
        let path = env_dir.join(MARKER_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EnvMetadata = serde_json::from_str(&content)?;

        if let Some(ref expected) = meta.checksum {
            let actual = meta.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    fingerprint: meta.fingerprint.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(meta))
    }
}
