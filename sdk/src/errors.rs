//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Depot
//! engine. Every public pipeline operation returns a result value encoding
//! its outcome instead of panicking; unexpected failures are caught at the
//! operation boundary, logged, and mapped onto the nearest variant here so
//! one bad source never aborts a batch.

use thiserror::Error;

/// Result type used across the engine
pub type Result<T> = std::result::Result<T, RepoError>;

/// Main repository error type
#[derive(Debug, Error)]
pub enum RepoError {
    /// Malformed or oversized input (missing manifest, identifier too long)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The external toolchain finished without writing its success sentinel
    #[error("Build failed: {0}")]
    BuildFailure(String),

    /// The build "succeeded" but the manifest's target assembly is absent
    #[error("Target assembly not found: {0}")]
    ArtifactMissing(String),

    /// Zip assembly or archive I/O failed
    #[error("Packaging failed: {0}")]
    PackagingFailure(String),

    /// A durable write failed; in-memory state has been rolled back
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Unknown id or uuid
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retried file operation still failing; may succeed later
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = RepoError::NotFound("runtime 7".to_string());
        assert_eq!(err.to_string(), "Not found: runtime 7");

        let err = RepoError::ArtifactMissing("Minimap.dll".to_string());
        assert!(err.to_string().contains("Minimap.dll"));
    }

    #[test]
    fn test_io_error_converts() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/depot/file")?)
        }
        assert!(matches!(read(), Err(RepoError::Io(_))));
    }
}
