//! Store configuration.

use std::time::Duration;

/// Configuration for a [`StateStore`](crate::StateStore).
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Storage slot this store saves to and loads from.
    pub slot: String,
    /// Snapshot ring capacity; the oldest snapshot is evicted when full.
    pub snapshot_capacity: usize,
    /// Auto-save policy.
    pub autosave: AutosavePolicy,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            slot: "main".to_string(),
            snapshot_capacity: 10,
            autosave: AutosavePolicy::default(),
        }
    }
}

/// When the store asks for an automatic save.
///
/// Triggers mark a save as pending; the host drives the actual write by
/// calling `poll_autosave`, which performs at most one save per debounce
/// window so bursts of triggers coalesce.
#[derive(Debug, Clone)]
pub struct AutosavePolicy {
    /// Master switch.
    pub enabled: bool,
    /// Wall-clock time since the last successful save.
    pub interval: Duration,
    /// Unsaved-update count that forces a save.
    pub update_threshold: usize,
    /// Minimum spacing between automatic saves.
    pub debounce: Duration,
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            update_threshold: 50,
            debounce: Duration::from_secs(2),
        }
    }
}
