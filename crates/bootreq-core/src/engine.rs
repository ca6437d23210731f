use crate::concurrency::interrupted;
use crate::CoreError;
use bootreq_runtime::{select_installer, select_isolation, Installer, IsolationTool};
use bootreq_schema::{fingerprint, Config, EnvIdentity, RequirementSet};
use bootreq_store::{CreateSlot, EnvHandle, EnvMetadata, EnvironmentStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Resolves requirement sets to built environments, building on a miss.
pub struct Engine {
    store: EnvironmentStore,
    config: Config,
    isolation: Box<dyn IsolationTool>,
    installer: Box<dyn Installer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub identity: EnvIdentity,
    pub handle: EnvHandle,
    /// False when an existing environment was reused.
    pub created: bool,
}

impl Engine {
    /// Open the store at `store_root` and select the isolation tool and
    /// installer for `config.backend`.
    pub fn new(store_root: impl Into<PathBuf>, config: Config) -> Result<Self, CoreError> {
        let store = EnvironmentStore::open(store_root)?;
        let isolation = select_isolation(&config, store.layout()).map_err(CoreError::Build)?;
        let installer = select_installer(&config).map_err(CoreError::Install)?;
        Ok(Self::with_tools(store, config, isolation, installer))
    }

    pub fn with_tools(
        store: EnvironmentStore,
        config: Config,
        isolation: Box<dyn IsolationTool>,
        installer: Box<dyn Installer>,
    ) -> Self {
        Self {
            store,
            config,
            isolation,
            installer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &EnvironmentStore {
        &self.store
    }

    pub fn identity(&self, requirements: &RequirementSet) -> EnvIdentity {
        fingerprint(requirements, &self.config)
    }

    /// Return the environment for `requirements`, creating it if needed.
    pub fn ensure(&self, requirements: &RequirementSet) -> Result<BuildResult, CoreError> {
        let identity = self.identity(requirements);
        if let Some(handle) = self.store.resolve(&identity.fingerprint) {
            if self.store.validate(&handle) {
                debug!("reusing environment {}", identity.short_id);
                return Ok(BuildResult {
                    identity,
                    handle,
                    created: false,
                });
            }
        }
        self.create(requirements, identity)
    }

    /// Build the environment for `requirements` under its build lock.
    ///
    /// If another process completes the same environment first, that one is
    /// returned instead. Any failure leaves the directory without a completion
    /// marker.
    pub fn create(
        &self,
        requirements: &RequirementSet,
        identity: EnvIdentity,
    ) -> Result<BuildResult, CoreError> {
        let lease = match self.store.begin_create(&identity.fingerprint)? {
            CreateSlot::Ready(handle) => {
                return Ok(BuildResult {
                    identity,
                    handle,
                    created: false,
                })
            }
            CreateSlot::Build(lease) => lease,
        };

        info!(
            "creating environment {} with {}",
            identity.short_id,
            self.isolation.name()
        );
        self.isolation
            .create(lease.root(), &self.config)
            .map_err(CoreError::Build)?;
        if interrupted() {
            return Err(CoreError::Interrupted);
        }

        info!(
            "installing {} requirement(s) with {}",
            requirements.len(),
            self.installer.name()
        );
        self.installer
            .install(lease.root(), requirements, &self.config)
            .map_err(CoreError::Install)?;
        if interrupted() {
            return Err(CoreError::Interrupted);
        }

        let metadata = EnvMetadata::new(&identity, requirements, &self.config);
        let handle = lease.commit(metadata)?;
        Ok(BuildResult {
            identity,
            handle,
            created: true,
        })
    }
}
