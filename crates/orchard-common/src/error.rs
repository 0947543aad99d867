//! Error types for Orchard.

use thiserror::Error;

/// Result type alias using OrchardError.
pub type Result<T> = std::result::Result<T, OrchardError>;

/// Errors that can occur in Orchard operations.
#[derive(Debug, Error)]
pub enum OrchardError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer and disk errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u32 },

    #[error("Page {page_id} is still pinned")]
    PagePinned { page_id: u32 },

    #[error("Page {page_id} is not pinned")]
    PageNotPinned { page_id: u32 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // B+ tree errors
    #[error("Page full, unable to insert entry")]
    PageFull,

    #[error("Invalid node type")]
    InvalidNodeType,

    #[error("Key too long: {size} bytes (max {max})")]
    KeyTooLong { size: usize, max: usize },

    #[error("Key type mismatch: expected {expected}, got {actual}")]
    KeyTypeMismatch { expected: String, actual: String },

    #[error("Record not found")]
    RecordNotFound,

    #[error("B+ tree corrupted: {0}")]
    Corrupted(String),

    // Catalog errors
    #[error("Index file not found: {0}")]
    MissingFile(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Catalog directory full")]
    CatalogFull,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: OrchardError = io_err.into();
        assert!(matches!(err, OrchardError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_buffer_errors_display() {
        let err = OrchardError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");

        let err = OrchardError::PagePinned { page_id: 7 };
        assert_eq!(err.to_string(), "Page 7 is still pinned");

        let err = OrchardError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_key_errors_display() {
        let err = OrchardError::KeyTooLong { size: 300, max: 256 };
        assert_eq!(err.to_string(), "Key too long: 300 bytes (max 256)");

        let err = OrchardError::KeyTypeMismatch {
            expected: "INT".to_string(),
            actual: "STR".to_string(),
        };
        assert_eq!(err.to_string(), "Key type mismatch: expected INT, got STR");
    }

    #[test]
    fn test_catalog_errors_display() {
        let err = OrchardError::MissingFile("orders_pk".to_string());
        assert_eq!(err.to_string(), "Index file not found: orders_pk");

        let err = OrchardError::FileAlreadyExists("orders_pk".to_string());
        assert_eq!(err.to_string(), "File already exists: orders_pk");
    }

    #[test]
    fn test_corrupted_display() {
        let err = OrchardError::Corrupted("dangling sibling link".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: dangling sibling link");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(OrchardError::RecordNotFound)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OrchardError>();
    }
}
