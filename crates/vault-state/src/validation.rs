//! Path-scoped validation rules.

use std::sync::Arc;

use serde_json::Value;

use vault_models::{get_path, Path};

use crate::error::{Result, StateError};

/// Predicate run against the value at a rule's path.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One validation rule: a path, a predicate, and the message reported when
/// the predicate rejects. Multiple rules may watch the same path.
#[derive(Clone)]
pub struct ValidationRule {
    path: Path,
    predicate: ValidatorFn,
    message: String,
}

impl ValidationRule {
    /// Creates a rule watching `path`.
    pub fn new(path: Path, predicate: ValidatorFn, message: impl Into<String>) -> Self {
        Self {
            path,
            predicate,
            message: message.into(),
        }
    }

    /// Checks a candidate state tree. A missing value is presented to the
    /// predicate as `Null`.
    pub fn check(&self, candidate: &Value) -> Result<()> {
        let value = get_path(candidate, &self.path)
            .cloned()
            .unwrap_or(Value::Null);
        if (self.predicate)(&value) {
            Ok(())
        } else {
            Err(StateError::Validation {
                path: self.path.to_string(),
                message: self.message.clone(),
            })
        }
    }
}
