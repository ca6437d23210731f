//! Environment store for bootreq.
//!
//! This crate provides the storage layer: `StoreLayout` for the directory
//! structure under the store root, `EnvMetadata` completion markers with
//! blake3 checksums, `StoreLock` per-fingerprint exclusive file locks, and
//! `EnvironmentStore`, which resolves fingerprints to built environments and
//! hands out `BuildLease`s so that only one process builds a given
//! fingerprint at a time.

pub mod layout;
pub mod lock;
pub mod metadata;
pub mod store;

pub use layout::{default_store_root, StoreLayout, STORE_FORMAT_VERSION};
pub use lock::StoreLock;
pub use metadata::{EnvMetadata, MARKER_FILE};
pub use store::{
    env_bin_dir, env_interpreter, has_marker, BuildLease, CreateSlot, EnvEntry, EnvHandle,
    EnvironmentStore,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("completion marker for '{fingerprint}' is corrupt: expected checksum {expected}, got {actual}")]
    IntegrityFailure {
        fingerprint: String,
        expected: String,
        actual: String,
    },
    #[error("metadata fingerprint '{found}' does not match environment '{expected}'")]
    FingerprintMismatch { expected: String, found: String },
}
