//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific filesystem behavior live here.

pub mod permissions;

pub use permissions::{create_dir_all_with_mode, set_mode};
