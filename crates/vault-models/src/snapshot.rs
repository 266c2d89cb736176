//! In-memory snapshots used for fast rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SnapshotId;

/// How a snapshot came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Requested explicitly by the application.
    Manual,
    /// Taken automatically before a risky operation (rollback, load, reset).
    Automatic,
}

/// An immutable copy of the state tree at a point in time.
///
/// Snapshots live in a bounded in-memory ring buffer and never touch disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier.
    pub id: SnapshotId,
    /// Optional human-readable label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Whether this snapshot was manual or automatic.
    pub source: SnapshotSource,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Deep copy of the state tree.
    pub state: Value,
}

impl Snapshot {
    /// Creates a snapshot of `state`.
    pub fn new(state: Value, label: Option<String>, source: SnapshotSource) -> Self {
        Self {
            id: SnapshotId::new(),
            label,
            source,
            created_at: Utc::now(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_captures_state() {
        let snap = Snapshot::new(json!({"a": 1}), Some("before fight".to_string()), SnapshotSource::Manual);
        assert_eq!(snap.state, json!({"a": 1}));
        assert_eq!(snap.source, SnapshotSource::Manual);
        assert_eq!(snap.label.as_deref(), Some("before fight"));
    }
}
