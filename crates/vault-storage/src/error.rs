//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur in the storage engine or a backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A loaded record's checksum did not match its data.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: String,
        /// Checksum computed from the loaded data.
        actual: String,
    },

    /// A chunked record is missing one of its fragments.
    #[error("missing chunk {index} of {count}")]
    MissingChunk {
        /// Index of the missing fragment.
        index: usize,
        /// Total fragment count per the index record.
        count: usize,
    },

    /// A stored value could not be parsed as a record.
    #[error("corrupt record in slot {slot}: {reason}")]
    CorruptRecord {
        /// Slot whose record is unreadable.
        slot: String,
        /// What went wrong.
        reason: String,
    },

    /// The backing medium rejected a write for lack of space.
    #[error("storage quota exceeded writing key {key}")]
    QuotaExceeded {
        /// Key whose write was rejected.
        key: String,
    },

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in the file backend.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
