//! Common error types

use thiserror::Error;

/// Errors surfaced by the rights engine.
///
/// "No matching record" is deliberately not an error: queries return an
/// empty set and deletes report zero affected rows, so sweep loops can
/// continue past empty results.
#[derive(Debug, Error)]
pub enum RightsError {
    /// The storage backend could not be opened or is not initialized.
    #[error("storage not ready: {0}")]
    StorageNotReady(String),

    /// A storage operation failed after the backend was opened.
    #[error("storage operation failed: {0}")]
    Storage(String),

    /// A caller-supplied argument was rejected before touching storage.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Consent was refused, timed out, or a bypass check failed.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The app metadata collaborator could not answer. Non-fatal for
    /// grants, which proceed with best-effort timestamps.
    #[error("app metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RightsError>;
