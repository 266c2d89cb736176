//! Pluggable consistency-check capability.
//!
//! The storage and migration engines use an implementation opportunistically
//! when one is attached; when absent, the check is simply skipped.

use serde_json::Value;

/// How bad a detected corruption is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CorruptionSeverity {
    /// Data is usable but has suspicious fields.
    Minor,
    /// Data is structurally damaged and should not be adopted as-is.
    Severe,
}

/// Result of a corruption check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    /// Whether any corruption was detected.
    pub is_corrupted: bool,
    /// Severity of the worst finding; meaningless when not corrupted.
    pub severity: CorruptionSeverity,
}

impl CorruptionReport {
    /// A clean report.
    pub fn clean() -> Self {
        Self {
            is_corrupted: false,
            severity: CorruptionSeverity::Minor,
        }
    }

    /// A corrupted report with the given severity.
    pub fn corrupted(severity: CorruptionSeverity) -> Self {
        Self {
            is_corrupted: true,
            severity,
        }
    }
}

/// External checker consulted by load and migration paths.
pub trait ConsistencyChecker: Send + Sync {
    /// Inspects a state tree for domain-level corruption.
    fn check(&self, data: &Value) -> CorruptionReport;

    /// Attempts to repair a corrupted tree. Returns the repaired tree, or
    /// `None` when repair is not possible.
    fn repair(&self, data: &Value) -> Option<Value>;
}
