//! Validated state container for Soulvault.
//!
//! [`StateStore`] owns a JSON state tree and funnels every mutation through
//! validation, structural diffing, and synchronous subscriber dispatch. A
//! bounded snapshot ring supports rollback; an attached
//! [`StorageEngine`](vault_storage::StorageEngine) and
//! [`MigrationEngine`](vault_migration::MigrationEngine) add durable saves,
//! corruption-recovering loads, and version migration on top.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use vault_state::{StateConfig, StateStore, Update, UpdateOptions};
//!
//! # fn run() -> vault_state::Result<()> {
//! let mut store = StateStore::new(json!({"player": {"jade": 100}}), StateConfig::default());
//! store.update(Update::Merge(json!({"player": {"jade": 50}})), UpdateOptions::default())?;
//! assert_eq!(store.get("player.jade")?, Some(json!(50)));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod store;
pub mod subscription;
pub mod validation;

pub use config::{AutosavePolicy, StateConfig};
pub use error::{Result, StateError};
pub use store::{
    LoadOptions, LoadOutcome, SaveOptions, SaveOutcome, StateStore, Update, UpdateOptions,
    UpdateSource,
};
pub use subscription::{Listener, SubscriptionId};
pub use validation::{ValidationRule, ValidatorFn};
