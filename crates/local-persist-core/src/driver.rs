//! Driver startup: config, state dir, lock, reconciliation, registry.

use crate::config::DriverConfig;
use crate::error::Result;
use crate::live::{DockerCliSource, DynLiveSource};
use crate::reconcile::{Conflict, ConflictPolicy, Reconciler, StateOrigin};
use crate::registry::VolumeRegistry;
use crate::snapshot::{SnapshotStore, StateLock};
use std::sync::Arc;
use tracing::info;

/// Builder for configuring driver startup.
///
/// # Example
///
/// ```rust,ignore
/// use local_persist::{DriverBuilder, DriverConfig};
///
/// let driver = DriverBuilder::new(DriverConfig::new("local-persist", "/", "/var/lib/docker/plugin-data"))
///     .accept_empty_live(false)
///     .build()
///     .await?;
/// ```
pub struct DriverBuilder {
    config: DriverConfig,
    live_source: Option<DynLiveSource>,
}

impl DriverBuilder {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            live_source: None,
        }
    }

    /// Live source consulted during reconciliation.
    ///
    /// Default: [`DockerCliSource`] with the configured query timeout.
    pub fn live_source(mut self, source: DynLiveSource) -> Self {
        self.live_source = Some(source);
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.config.conflict_policy = policy;
        self
    }

    pub fn accept_empty_live(mut self, accept: bool) -> Self {
        self.config.accept_empty_live = accept;
        self
    }

    /// Prepare the state dir, take `<name>.lock`, reconcile, and seed the
    /// registry. The lock is held for the driver's lifetime.
    pub async fn build(self) -> Result<Driver> {
        self.config.validate()?;
        info!("Starting driver {}", self.config.name);

        let store = SnapshotStore::new(&self.config);
        store.ensure_state_dir()?;

        let lock = StateLock::acquire(&self.config)?;

        let source = self.live_source.unwrap_or_else(|| {
            Arc::new(DockerCliSource::default().with_timeout(self.config.live_query_timeout))
        });

        let reconciliation = Reconciler::new(&self.config, source.as_ref(), &store)
            .run()
            .await;
        info!(
            "Found {} volume(s) on startup ({:?})",
            reconciliation.state.len(),
            reconciliation.origin
        );

        let registry = VolumeRegistry::new(&self.config.base_dir, store, reconciliation.state);

        Ok(Driver {
            config: self.config,
            registry,
            origin: reconciliation.origin,
            conflicts: reconciliation.conflicts,
            _lock: lock,
        })
    }
}

/// A started driver instance.
#[derive(Debug)]
pub struct Driver {
    config: DriverConfig,
    registry: VolumeRegistry,
    origin: StateOrigin,
    conflicts: Vec<Conflict>,
    _lock: StateLock,
}

impl Driver {
    pub fn builder(config: DriverConfig) -> DriverBuilder {
        DriverBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Which source seeded the registry at startup.
    pub fn origin(&self) -> StateOrigin {
        self.origin
    }

    /// Conflicting live observations seen at startup.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }
}
