//! local-persist - durable name-to-mountpoint registry for a volume driver.
//!
//! The crate keeps an in-memory map of volume names to mountpoints relative
//! to a base directory, flushes it to a JSON snapshot after every mutation,
//! and reconciles its startup state against the container runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use local_persist::{DriverBuilder, DriverConfig};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> local_persist::Result<()> {
//!     let config = DriverConfig::new("local-persist", "/mnt/base", "/var/lib/docker/plugin-data");
//!     let driver = DriverBuilder::new(config).build().await?;
//!
//!     let options = HashMap::from([("mountpoint".to_string(), "data/vol1".to_string())]);
//!     driver.registry().create("vol1", &options).await?;
//!     println!("{}", driver.registry().resolve("vol1").await.display());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod live;
pub mod platform;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod volume;

pub use config::{DriverConfig, DriverDefaults};
pub use driver::{Driver, DriverBuilder};
pub use error::{PersistError, Result};
pub use live::{DisabledSource, DockerCliSource, DynLiveSource, LiveSource, Observation};
pub use reconcile::{Conflict, ConflictPolicy, Reconciliation, Reconciler, StateOrigin};
pub use registry::VolumeRegistry;
pub use snapshot::{SnapshotStore, StateLock};
pub use volume::{Volume, VolumeMap};
