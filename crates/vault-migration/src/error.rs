//! Error types for migration operations.

use thiserror::Error;

/// Errors that can occur registering or running migrations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// No edge chain connects the two versions.
    #[error("no migration path from {from} to {to}")]
    NoPath {
        /// Version the data is at.
        from: String,
        /// Version that was requested.
        to: String,
    },

    /// A migration step returned an error or an unusable tree.
    #[error("migration step {from} -> {to} failed: {reason}")]
    StepFailed {
        /// Source version of the failing edge.
        from: String,
        /// Target version of the failing edge.
        to: String,
        /// What went wrong.
        reason: String,
    },

    /// Registering this edge would make the version graph cyclic.
    #[error("registering {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Source version of the rejected edge.
        from: String,
        /// Target version of the rejected edge.
        to: String,
    },

    /// The exact edge is already registered.
    #[error("migration {from} -> {to} is already registered")]
    DuplicateEdge {
        /// Source version of the rejected edge.
        from: String,
        /// Target version of the rejected edge.
        to: String,
    },

    /// No history entry (with a backup) exists for the given run.
    #[error("no rollbackable migration run with id {0}")]
    UnknownMigration(String),
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
