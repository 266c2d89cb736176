//! Core data model for Soulvault.
//!
//! This crate provides the types shared by the state container, the storage
//! engine, and the migration engine:
//!
//! - **path**: typed path segments for addressing into a state tree, with the
//!   dot-delimited string form kept at the API boundary
//! - **value**: state tree helpers (deep merge, structural diff, canonical
//!   serialization)
//! - **record**: the versioned, checksummed save record format
//! - **snapshot**: in-memory snapshots used for rollback
//! - **migration**: the history record kept for each migration run
//! - **consistency**: the pluggable corruption-check capability

pub mod consistency;
pub mod ids;
pub mod migration;
pub mod path;
pub mod record;
pub mod snapshot;
pub mod value;

pub use consistency::{ConsistencyChecker, CorruptionReport, CorruptionSeverity};
pub use ids::{MigrationId, SnapshotId};
pub use migration::MigrationRecord;
pub use path::{Path, PathError, PathSegment};
pub use record::{checksum_of, ChunkIndex, ExportRecord, SaveRecord, StoredRecord};
pub use snapshot::{Snapshot, SnapshotSource};
pub use value::{canonical_json, deep_merge, diff, get_path, set_path, Change};
