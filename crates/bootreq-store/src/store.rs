use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::metadata::{EnvMetadata, MARKER_FILE};
use crate::StoreError;
use bootreq_schema::Fingerprint;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A completed environment in the store.
#[derive(Debug, Clone, Serialize)]
pub struct EnvHandle {
    pub fingerprint: Fingerprint,
    pub root: PathBuf,
    pub metadata: EnvMetadata,
}

impl EnvHandle {
    pub fn bin_dir(&self) -> PathBuf {
        env_bin_dir(&self.root)
    }

    pub fn interpreter(&self) -> PathBuf {
        env_interpreter(&self.root)
    }
}

#[cfg(unix)]
const BIN_DIR: &str = "bin";
#[cfg(windows)]
const BIN_DIR: &str = "Scripts";

#[cfg(unix)]
const PYTHON_EXE: &str = "python";
#[cfg(windows)]
const PYTHON_EXE: &str = "python.exe";

/// Executables directory of the environment rooted at `root`.
pub fn env_bin_dir(root: &Path) -> PathBuf {
    root.join(BIN_DIR)
}

/// Interpreter of the environment rooted at `root`.
pub fn env_interpreter(root: &Path) -> PathBuf {
    env_bin_dir(root).join(PYTHON_EXE)
}

/// Result of [`EnvironmentStore::begin_create`].
#[derive(Debug)]
pub enum CreateSlot {
    /// Another process finished the environment while we waited for the lock.
    Ready(EnvHandle),
    /// The caller holds the build lock and must populate the directory.
    Build(BuildLease),
}

/// Exclusive right to build one fingerprint.
///
/// The lock is held until the lease is committed or dropped. Dropping without
/// [`commit`](Self::commit) leaves the directory without a completion marker,
/// so it is never resolved and is rebuilt or pruned later.
#[derive(Debug)]
pub struct BuildLease {
    fingerprint: Fingerprint,
    root: PathBuf,
    _lock: StoreLock,
}

impl BuildLease {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Directory the environment must be built in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish the environment by writing its completion marker.
    pub fn commit(self, metadata: EnvMetadata) -> Result<EnvHandle, StoreError> {
        if metadata.fingerprint != self.fingerprint {
            return Err(StoreError::FingerprintMismatch {
                expected: self.fingerprint.to_string(),
                found: metadata.fingerprint.to_string(),
            });
        }
        metadata.write_marker(&self.root)?;
        info!("committed environment {}", metadata.short_id);
        Ok(EnvHandle {
            fingerprint: self.fingerprint,
            root: self.root,
            metadata,
        })
    }
}

/// One directory under `envs/`, complete or not.
#[derive(Debug, Clone, Serialize)]
pub struct EnvEntry {
    pub fingerprint: String,
    pub root: PathBuf,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvMetadata>,
}

/// Fingerprint-keyed environment directories with completion markers.
pub struct EnvironmentStore {
    layout: StoreLayout,
}

impl EnvironmentStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Open the store at `root`, creating its directories on first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Look up a completed environment.
    ///
    /// An environment counts only if its marker exists, verifies, and names
    /// the same fingerprint as its directory. Anything else is treated as
    /// absent so that it gets rebuilt.
    pub fn resolve(&self, fingerprint: &Fingerprint) -> Option<EnvHandle> {
        let root = self.layout.env_path(fingerprint);
        match EnvMetadata::read_marker(&root) {
            Ok(Some(metadata)) if metadata.fingerprint == *fingerprint => Some(EnvHandle {
                fingerprint: fingerprint.clone(),
                root,
                metadata,
            }),
            Ok(Some(metadata)) => {
                warn!(
                    "marker in {} names {}, ignoring",
                    root.display(),
                    metadata.fingerprint
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("ignoring unreadable marker in {}: {e}", root.display());
                None
            }
        }
    }

    /// A handle is usable when its marker still verifies and its interpreter exists.
    pub fn validate(&self, handle: &EnvHandle) -> bool {
        self.resolve(&handle.fingerprint).is_some() && handle.interpreter().exists()
    }

    /// Take the build lock for `fingerprint`, blocking while another process
    /// holds it.
    ///
    /// Once the lock is held the store is checked again: if the environment
    /// was completed in the meantime the caller gets it back as
    /// [`CreateSlot::Ready`]. Otherwise any partial or broken directory left
    /// by an earlier build is removed and a fresh [`BuildLease`] is returned.
    pub fn begin_create(&self, fingerprint: &Fingerprint) -> Result<CreateSlot, StoreError> {
        let lock_path = self.layout.lock_path(fingerprint);
        let lock = match StoreLock::try_acquire(&lock_path)? {
            Some(lock) => lock,
            None => {
                info!("waiting for another process building {}", short(fingerprint));
                StoreLock::acquire(&lock_path)?
            }
        };

        if let Some(handle) = self.resolve(fingerprint).filter(|h| h.interpreter().exists()) {
            debug!("environment {} completed by another process", short(fingerprint));
            return Ok(CreateSlot::Ready(handle));
        }

        let root = self.layout.env_path(fingerprint);
        if root.exists() {
            warn!("removing incomplete environment {}", root.display());
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;

        Ok(CreateSlot::Build(BuildLease {
            fingerprint: fingerprint.clone(),
            root,
            _lock: lock,
        }))
    }

    /// Every directory under `envs/`, sorted by fingerprint.
    pub fn list(&self) -> Result<Vec<EnvEntry>, StoreError> {
        let envs_dir = self.layout.envs_dir();
        if !envs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&envs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let root = entry.path();
            let metadata = EnvMetadata::read_marker(&root).ok().flatten();
            let complete = metadata.as_ref().is_some_and(|m| m.fingerprint == *name);
            entries.push(EnvEntry {
                fingerprint: name,
                root,
                complete,
                metadata,
            });
        }
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }

    /// Remove environments without a valid completion marker.
    ///
    /// Directories whose build lock is currently held are skipped, since a
    /// build is in progress there. Returns the directories removed, or that
    /// would be removed when `dry_run` is set.
    pub fn prune(&self, dry_run: bool) -> Result<Vec<PathBuf>, StoreError> {
        let mut removed = Vec::new();
        for entry in self.list()? {
            if entry.complete {
                continue;
            }
            let lock_path = self.layout.lock_path(&entry.fingerprint);
            let Some(_lock) = StoreLock::try_acquire(&lock_path)? else {
                debug!("skipping {}: build in progress", entry.fingerprint);
                continue;
            };
            if !dry_run {
                // The lock file stays: a builder blocked on it would otherwise
                // hold an unlinked inode while a newcomer locks a fresh one.
                fs::remove_dir_all(&entry.root)?;
                info!("pruned {}", entry.root.display());
            }
            removed.push(entry.root);
        }
        Ok(removed)
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// True if `dir` carries a completion marker file, without verifying it.
pub fn has_marker(dir: &Path) -> bool {
    dir.join(MARKER_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootreq_schema::{fingerprint, Config, RequirementSet};

    fn setup() -> (tempfile::TempDir, EnvironmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvironmentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn identity(specs: &[&str]) -> (RequirementSet, Config, bootreq_schema::EnvIdentity) {
        let reqs = RequirementSet::parse(specs).unwrap();
        let config = Config::default();
        let id = fingerprint(&reqs, &config);
        (reqs, config, id)
    }

    fn build(store: &EnvironmentStore, specs: &[&str]) -> EnvHandle {
        let (reqs, config, id) = identity(specs);
        let CreateSlot::Build(lease) = store.begin_create(&id.fingerprint).unwrap() else {
            panic!("expected a build lease");
        };
        fs::create_dir_all(lease.root().join("bin")).unwrap();
        fs::write(lease.root().join("bin/python"), "").unwrap();
        lease.commit(EnvMetadata::new(&id, &reqs, &config)).unwrap()
    }

    #[test]
    fn resolve_unknown_is_none() {
        let (_dir, store) = setup();
        let (_, _, id) = identity(&["requests"]);
        assert!(store.resolve(&id.fingerprint).is_none());
    }

    #[test]
    fn committed_environment_resolves_and_validates() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        let resolved = store.resolve(&handle.fingerprint).unwrap();
        assert_eq!(resolved.root, handle.root);
        assert!(store.validate(&resolved));
        assert!(has_marker(&resolved.root));
    }

    #[test]
    fn validate_fails_without_interpreter() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        fs::remove_file(handle.interpreter()).unwrap();
        assert!(!store.validate(&handle));
    }

    #[test]
    fn dropped_lease_is_never_resolved() {
        let (_dir, store) = setup();
        let (_, _, id) = identity(&["requests"]);
        {
            let CreateSlot::Build(lease) = store.begin_create(&id.fingerprint).unwrap() else {
                panic!("expected a build lease");
            };
            fs::write(lease.root().join("partial"), "x").unwrap();
        }
        assert!(store.resolve(&id.fingerprint).is_none());

        let CreateSlot::Build(lease) = store.begin_create(&id.fingerprint).unwrap() else {
            panic!("expected a build lease");
        };
        assert!(!lease.root().join("partial").exists());
    }

    #[test]
    fn begin_create_returns_ready_when_complete() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        match store.begin_create(&handle.fingerprint).unwrap() {
            CreateSlot::Ready(h) => assert_eq!(h.root, handle.root),
            CreateSlot::Build(_) => panic!("complete environment was rebuilt"),
        }
    }

    #[test]
    fn commit_rejects_foreign_metadata() {
        let (_dir, store) = setup();
        let (_, _, id) = identity(&["requests"]);
        let (other_reqs, config, other_id) = identity(&["rich"]);
        let CreateSlot::Build(lease) = store.begin_create(&id.fingerprint).unwrap() else {
            panic!("expected a build lease");
        };
        let err = lease
            .commit(EnvMetadata::new(&other_id, &other_reqs, &config))
            .unwrap_err();
        assert!(matches!(err, StoreError::FingerprintMismatch { .. }));
        assert!(store.resolve(&id.fingerprint).is_none());
    }

    #[test]
    fn marker_for_other_fingerprint_is_ignored() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        let (_, _, other) = identity(&["rich"]);
        let moved = store.layout().env_path(&other.fingerprint);
        fs::rename(&handle.root, &moved).unwrap();
        assert!(store.resolve(&other.fingerprint).is_none());
    }

    #[test]
    fn list_reports_complete_and_partial() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        fs::create_dir_all(store.layout().env_path("deadbeef")).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        let complete: Vec<_> = entries.iter().filter(|e| e.complete).collect();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].fingerprint, handle.fingerprint.as_str());
    }

    #[test]
    fn prune_removes_only_partial() {
        let (_dir, store) = setup();
        let handle = build(&store, &["requests"]);
        let partial = store.layout().env_path("deadbeef");
        fs::create_dir_all(&partial).unwrap();

        let dry = store.prune(true).unwrap();
        assert_eq!(dry, vec![partial.clone()]);
        assert!(partial.exists());

        let removed = store.prune(false).unwrap();
        assert_eq!(removed, vec![partial.clone()]);
        assert!(!partial.exists());
        assert!(handle.root.exists());
    }

    #[test]
    fn prune_skips_locked_build() {
        let (_dir, store) = setup();
        let (_, _, id) = identity(&["requests"]);
        let CreateSlot::Build(lease) = store.begin_create(&id.fingerprint).unwrap() else {
            panic!("expected a build lease");
        };
        assert!(store.prune(false).unwrap().is_empty());
        assert!(lease.root().exists());
    }

    #[test]
    fn prune_keeps_lock_file_so_builds_stay_exclusive() {
        let (_dir, store) = setup();
        let (_, _, id) = identity(&["requests"]);
        let partial = store.layout().env_path(&id.fingerprint);
        fs::create_dir_all(&partial).unwrap();
        let lock_path = store.layout().lock_path(&id.fingerprint);

        // A waiter opened the lock file before the prune ran.
        let waiter = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .unwrap();

        assert_eq!(store.prune(false).unwrap(), vec![partial.clone()]);
        assert!(!partial.exists());
        assert!(lock_path.exists());

        fs2::FileExt::lock_exclusive(&waiter).unwrap();
        assert!(StoreLock::try_acquire(&lock_path).unwrap().is_none());
        fs2::FileExt::unlock(&waiter).unwrap();
        assert!(StoreLock::try_acquire(&lock_path).unwrap().is_some());
    }
}
