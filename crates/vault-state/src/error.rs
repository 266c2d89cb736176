//! Error types for the state container.

use thiserror::Error;

use vault_migration::MigrationError;
use vault_models::PathError;
use vault_storage::StorageError;

/// Errors that can occur in a state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// A validation rule rejected an update candidate.
    #[error("validation failed at {path}: {message}")]
    Validation {
        /// Path the failing rule watches.
        path: String,
        /// The rule's message.
        message: String,
    },

    /// No snapshot exists for the requested rollback.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// `increment` hit a leaf that is not a number.
    #[error("value at {path} is not a number")]
    NotANumber {
        /// Path of the offending leaf.
        path: String,
    },

    /// `increment` would overflow the numeric range at a leaf.
    #[error("increment at {path} overflowed")]
    Overflow {
        /// Path of the offending leaf.
        path: String,
    },

    /// An update produced a state tree whose root is not an object.
    #[error("state root must be an object")]
    NonObjectRoot,

    /// A persistence operation was requested with no storage engine attached.
    #[error("no storage engine attached")]
    NoStorage,

    /// A loaded record needs migration but no migration engine is attached.
    #[error("no migration engine attached")]
    NoMigrations,

    /// A loaded record's version differs and migration was not requested.
    #[error("record version {found} does not match expected {expected}")]
    VersionMismatch {
        /// Version the record declares.
        found: String,
        /// Version the storage engine writes.
        expected: String,
    },

    /// A migration chain ran but its result was rejected.
    #[error("migration from {from} to {to} was rejected, keeping current state")]
    MigrationRejected {
        /// Version the record was at.
        from: String,
        /// Version that was targeted.
        to: String,
    },

    /// The requested slot holds no record.
    #[error("slot {0} is empty")]
    EmptySlot(String),

    /// Malformed path string.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Storage engine failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Migration engine failure.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
