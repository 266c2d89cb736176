//! Record of a completed migration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::MigrationId;

/// One entry in the migration engine's history.
///
/// When a backup was requested for the run, the pre-migration tree is kept
/// here so the run can be rolled back later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Unique id for this run.
    pub id: MigrationId,
    /// Version the data started at.
    pub from: String,
    /// Version the run targeted.
    pub to: String,
    /// Edge chain actually applied, in order.
    pub applied: Vec<(String, String)>,
    /// Pre-migration tree, when a backup was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<Value>,
    /// Whether the run produced an adopted result.
    pub success: bool,
    /// When the run happened.
    pub timestamp: DateTime<Utc>,
}
