//! Save record format.
//!
//! A [`SaveRecord`] is the unit written to durable storage: a versioned,
//! timestamped state tree with a CRC32 checksum over the canonical
//! serialization of `data`. Oversized records are stored as a [`ChunkIndex`]
//! plus ordered sibling fragments.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::canonical_json;

/// Computes the checksum of a state tree.
///
/// Format: `crc32:<8 lowercase hex chars>` over the canonical (recursively
/// key-sorted) JSON serialization, so the digest is deterministic for a
/// given tree.
pub fn checksum_of(data: &Value) -> serde_json::Result<String> {
    let canonical = canonical_json(data)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("crc32:{:08x}", hasher.finalize()))
}

/// A complete save record as written to a storage slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    /// Schema version of `data`.
    pub version: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Checksum of `data` (see [`checksum_of`]).
    pub checksum: String,
    /// Always `false` for a full record; chunked slots store a
    /// [`ChunkIndex`] instead.
    #[serde(default)]
    pub chunked: bool,
    /// The state tree itself.
    pub data: Value,
}

impl SaveRecord {
    /// Builds a record for `data`, stamping the current time and checksum.
    pub fn new(version: impl Into<String>, data: Value) -> serde_json::Result<Self> {
        let checksum = checksum_of(&data)?;
        Ok(Self {
            version: version.into(),
            timestamp: Utc::now().timestamp_millis(),
            checksum,
            chunked: false,
            data,
        })
    }

    /// Recomputes the data checksum and compares it to the stored one.
    pub fn verify(&self) -> serde_json::Result<bool> {
        Ok(checksum_of(&self.data)? == self.checksum)
    }
}

/// Index record stored at the base key of a chunked slot.
///
/// Fragments live at `<key>_chunk_<n>` for `n` in `0..chunk_count` and are
/// reassembled strictly in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkIndex {
    /// Schema version of the chunked record.
    pub version: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Checksum of the chunked record's `data`.
    pub checksum: String,
    /// Always `true`.
    pub chunked: bool,
    /// Number of fragments.
    pub chunk_count: usize,
    /// Total payload size in bytes across all fragments.
    pub total_size: usize,
}

/// What physically sits at a slot's base key: either a chunk index or a
/// full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    /// Chunk index for an oversized record.
    Index(ChunkIndex),
    /// Directly stored record.
    Full(SaveRecord),
}

/// Self-describing document produced by `export` and accepted by `import`.
///
/// The checksum is optional on import; when present it is verified before
/// the record is adopted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Schema version of `data`.
    pub version: String,
    /// Export time, epoch milliseconds.
    pub timestamp: i64,
    /// Optional checksum of `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// The exported state tree.
    pub data: Value,
}
