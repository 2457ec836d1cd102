// this_file: src/error.rs
//! Error types for the glyphcache library

use thiserror::Error;

/// Main error type for glyphcache operations
#[derive(Debug, Error)]
pub enum Error {
    /// Every cache slot in the manager's registry is taken
    #[error("Too many registered caches")]
    TooManyCaches,

    /// Invalid input parameter (bad handle, stale node reference,
    /// out-of-range glyph index, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was violated. Never expected during normal
    /// operation.
    #[error("Corrupted cache: {0}")]
    CorruptedCache(&'static str),

    /// The external face/size provider failed to construct an object
    #[error("Source error: {0}")]
    Source(String),
}

/// Result type alias for glyphcache operations
pub type Result<T> = std::result::Result<T, Error>;
