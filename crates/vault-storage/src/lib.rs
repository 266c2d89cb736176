//! Durable storage for Soulvault state trees.
//!
//! The [`StorageEngine`] writes versioned, checksummed save records to a
//! pluggable [`StorageBackend`], transparently chunking oversized payloads,
//! rotating pre-overwrite backups, and recovering from corrupted or partial
//! records on load. Optional [`Compressor`] and consistency-checker
//! capabilities slot in without changing the engine's surface.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use vault_storage::{MemoryBackend, SaveRequest, LoadRequest, StorageConfig, StorageEngine};
//!
//! # async fn run() -> vault_storage::Result<()> {
//! let engine = StorageEngine::new(Arc::new(MemoryBackend::new()), StorageConfig::default());
//! engine.save("main", &json!({"player": {"jade": 100}}), SaveRequest::default()).await?;
//! let loaded = engine.load("main", LoadRequest::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod compress;
pub mod engine;
pub mod error;
pub mod file_backend;

pub use backend::{MemoryBackend, StorageBackend};
pub use compress::{Compressor, DeflateCompressor, COMPRESSION_MARKER};
pub use engine::{
    LoadRequest, LoadedRecord, SaveReceipt, SaveRequest, StorageConfig, StorageEngine,
};
pub use error::{Result, StorageError};
pub use file_backend::FileBackend;
