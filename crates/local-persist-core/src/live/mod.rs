//! Live source of currently mounted volumes.
//!
//! The container runtime knows which of this driver's volumes are mounted
//! right now. It is queried once at startup by the reconciler and never on
//! the request path.

mod docker;

pub use docker::DockerCliSource;

use crate::error::{PersistError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One `(name, source path)` pair reported by a live source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub name: String,
    pub source: String,
}

impl Observation {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Queries the runtime for volumes owned by a driver.
///
/// Implementations return observations in the order the runtime reported
/// them, duplicates included; conflict handling belongs to the reconciler.
#[async_trait]
pub trait LiveSource: Send + Sync {
    /// Short identifier for logs (e.g., "docker-cli").
    fn id(&self) -> &'static str;

    /// Observations for volumes whose owning driver is `driver_name`.
    async fn observe(&self, driver_name: &str) -> Result<Vec<Observation>>;
}

/// Shared handle to any live source.
pub type DynLiveSource = Arc<dyn LiveSource>;

/// A live source that is never reachable.
///
/// Used when the operator wants startup to rely on the snapshot alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSource;

#[async_trait]
impl LiveSource for DisabledSource {
    fn id(&self) -> &'static str {
        "disabled"
    }

    async fn observe(&self, _driver_name: &str) -> Result<Vec<Observation>> {
        Err(PersistError::live_query("live query disabled"))
    }
}
