//! Configuration structures for Orchard.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Path to the backing data file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./orchard.dat"),
            fsync_enabled: true,
        }
    }
}

/// Configuration for the buffer manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferManagerConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_config_defaults() {
        let config = DiskManagerConfig::default();
        assert_eq!(config.path, PathBuf::from("./orchard.dat"));
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_buffer_config_defaults() {
        let config = BufferManagerConfig::default();
        assert_eq!(config.num_frames, 1024);
    }

    #[test]
    fn test_disk_config_serde_roundtrip() {
        let original = DiskManagerConfig {
            path: PathBuf::from("/var/lib/orchard/data.dat"),
            fsync_enabled: false,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: DiskManagerConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.path, deserialized.path);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }

    #[test]
    fn test_buffer_config_serde_roundtrip() {
        let original = BufferManagerConfig { num_frames: 64 };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: BufferManagerConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.num_frames, deserialized.num_frames);
    }
}
