//! Snapshot persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - The per-driver snapshot store
//! - An advisory lock so one process owns a driver's state files

mod atomic;
mod lock;
mod store;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use lock::StateLock;
pub use store::SnapshotStore;
