//! Buffer and disk layer for Orchard.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O and page allocation
//! - Buffer manager with pin/unpin discipline and clock eviction
//! - Catalog mapping index file names to their header pages

mod catalog;
mod disk;
mod frame;
mod pool;

pub use catalog::Catalog;
pub use disk::DiskManager;
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferManager, BufferStats};
