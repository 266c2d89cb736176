//! Save-data migration for Soulvault.
//!
//! A [`MigrationEngine`] holds a directed acyclic graph of version-to-version
//! transforms and migrates a state tree along the shortest registered chain.
//! Failed steps never corrupt or drop the caller's data, and runs that
//! captured a backup can be rolled back from history.

pub mod engine;
pub mod error;

pub use engine::{MigrateFn, MigrateOptions, MigrationEngine, MigrationOutcome};
pub use error::{MigrationError, Result};
