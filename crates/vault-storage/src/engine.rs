//! Durable storage engine.
//!
//! Layers save records, chunking, checksum verification, backup rotation,
//! and corruption recovery on top of a plain key/value [`StorageBackend`].
//!
//! Key namespace for a slot `main`:
//!
//! ```text
//! main                  direct record, or chunk index when oversized
//! main_chunk_<n>        ordered payload fragments
//! main_backup_<ms>      rotated pre-overwrite backups (self-contained)
//! main_emergency        best-effort record written on abrupt termination
//! ```
//!
//! All physical writes pass through a single FIFO queue: a queued save waits
//! for every earlier save, to any slot, before starting, so two in-flight
//! saves can never interleave a chunk set. Reads are not queued; they always
//! verify a checksum before trusting a record.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vault_models::{
    checksum_of, ChunkIndex, ConsistencyChecker, CorruptionSeverity, ExportRecord, SaveRecord,
    StoredRecord,
};

use crate::backend::StorageBackend;
use crate::compress::Compressor;
use crate::error::{Result, StorageError};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Schema version stamped into new records.
    pub version: String,
    /// Payloads larger than this many bytes are chunked.
    pub chunk_threshold: usize,
    /// Backups retained per slot; oldest pruned first.
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            chunk_threshold: 256 * 1024,
            max_backups: 3,
        }
    }
}

/// Options for a single save.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Run the payload through the attached compressor.
    pub compress: bool,
    /// Copy the existing record to a timestamped backup key first.
    pub backup: bool,
    /// Read the record back after writing and compare trees.
    pub verify: bool,
}

impl Default for SaveRequest {
    fn default() -> Self {
        Self {
            compress: false,
            backup: true,
            verify: false,
        }
    }
}

/// Options for a single load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Verify the record checksum (and attempt recovery on mismatch).
    pub verify: bool,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    /// Slot written.
    pub slot: String,
    /// Checksum of the written data.
    pub checksum: String,
    /// Whether the payload was chunked.
    pub chunked: bool,
    /// Fragment count (zero when not chunked).
    pub chunk_count: usize,
    /// Physical payload size in bytes.
    pub bytes: usize,
    /// Whether a backup of the previous record was taken.
    pub backed_up: bool,
}

/// A record successfully loaded from a slot.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    /// Schema version the record was saved under.
    pub version: String,
    /// Save time, epoch milliseconds.
    pub timestamp: i64,
    /// The state tree.
    pub data: Value,
    /// True when the primary record was unusable and the data came from a
    /// backup or the emergency record.
    pub recovered: bool,
}

/// Storage engine over a pluggable backend.
pub struct StorageEngine {
    backend: Arc<dyn StorageBackend>,
    config: StorageConfig,
    compressor: Option<Arc<dyn Compressor>>,
    checker: Option<Arc<dyn ConsistencyChecker>>,
    /// FIFO write gate; tokio's mutex wakes waiters in queue order.
    write_gate: Mutex<()>,
}

impl StorageEngine {
    /// Creates an engine over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, config: StorageConfig) -> Self {
        Self {
            backend,
            config,
            compressor: None,
            checker: None,
            write_gate: Mutex::new(()),
        }
    }

    /// Attaches a compression capability.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Attaches a consistency checker consulted opportunistically on load.
    pub fn with_consistency_checker(mut self, checker: Arc<dyn ConsistencyChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Returns the configured schema version.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    fn chunk_key(slot: &str, index: usize) -> String {
        format!("{}_chunk_{}", slot, index)
    }

    fn backup_prefix(slot: &str) -> String {
        format!("{}_backup_", slot)
    }

    fn emergency_key(slot: &str) -> String {
        format!("{}_emergency", slot)
    }

    /// Saves `data` to `slot` as a checksummed record.
    pub async fn save(&self, slot: &str, data: &Value, req: SaveRequest) -> Result<SaveReceipt> {
        let record = SaveRecord::new(&self.config.version, data.clone())?;
        let checksum = record.checksum.clone();
        let timestamp = record.timestamp;
        let mut payload = serde_json::to_string(&record)?;

        if req.compress {
            if let Some(compressor) = &self.compressor {
                payload = compressor.compress(&payload)?;
            }
        }

        let _gate = self.write_gate.lock().await;

        let backed_up = if req.backup {
            self.backup_existing(slot).await
        } else {
            false
        };

        let bytes = payload.len();
        let (chunked, chunk_count) = self
            .write_payload(slot, &payload, &record.version, timestamp, &checksum)
            .await?;

        info!(
            slot,
            bytes, chunked, chunk_count, backed_up, "record saved"
        );

        let receipt = SaveReceipt {
            slot: slot.to_string(),
            checksum,
            chunked,
            chunk_count,
            bytes,
            backed_up,
        };

        if req.verify {
            let loaded = self
                .load(slot, LoadRequest { verify: true })
                .await?
                .ok_or_else(|| StorageError::CorruptRecord {
                    slot: slot.to_string(),
                    reason: "post-save verification read returned nothing".to_string(),
                })?;
            if &loaded.data != data {
                return Err(StorageError::CorruptRecord {
                    slot: slot.to_string(),
                    reason: "post-save verification mismatch".to_string(),
                });
            }
        }

        Ok(receipt)
    }

    /// Writes an already-serialized payload, chunking when oversized.
    /// Caller must hold the write gate.
    async fn write_payload(
        &self,
        slot: &str,
        payload: &str,
        version: &str,
        timestamp: i64,
        checksum: &str,
    ) -> Result<(bool, usize)> {
        let bytes = payload.len();

        let (chunked, chunk_count) = if bytes > self.config.chunk_threshold {
            let fragments = split_payload(payload, self.config.chunk_threshold);
            for (i, fragment) in fragments.iter().enumerate() {
                self.put_with_reclaim(&Self::chunk_key(slot, i), fragment, slot)
                    .await?;
            }
            // Index last: a reader never sees an index pointing at
            // fragments that are not all in place yet.
            let index = ChunkIndex {
                version: version.to_string(),
                timestamp,
                checksum: checksum.to_string(),
                chunked: true,
                chunk_count: fragments.len(),
                total_size: bytes,
            };
            self.put_with_reclaim(slot, &serde_json::to_string(&index)?, slot)
                .await?;
            (true, fragments.len())
        } else {
            self.put_with_reclaim(slot, payload, slot).await?;
            (false, 0)
        };

        self.clear_stale_chunks(slot, chunk_count).await?;
        Ok((chunked, chunk_count))
    }

    /// Removes fragments left over from a previous, larger chunk set.
    async fn clear_stale_chunks(&self, slot: &str, from_index: usize) -> Result<()> {
        let mut index = from_index;
        while self.backend.remove(&Self::chunk_key(slot, index)).await? {
            debug!(slot, index, "removed stale chunk");
            index += 1;
        }
        Ok(())
    }

    /// Writes with one quota-reclamation retry: on a full medium, prune this
    /// slot's backups and try once more.
    async fn put_with_reclaim(&self, key: &str, value: &str, slot: &str) -> Result<()> {
        match self.backend.put(key, value).await {
            Err(StorageError::QuotaExceeded { .. }) => {
                warn!(key, slot, "quota exceeded, pruning backups and retrying");
                let reclaimed = self.prune_backups(slot, 0).await?;
                if reclaimed == 0 {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
                self.backend.put(key, value).await
            }
            other => other,
        }
    }

    /// Copies the current record (reassembled and decompressed, so backups
    /// are always self-contained single values) to a timestamped backup key.
    /// Best effort: a failed backup is logged, never fails the save.
    async fn backup_existing(&self, slot: &str) -> bool {
        let text = match self.read_reassembled(slot).await {
            Ok(Some(text)) => text,
            Ok(None) => return false,
            Err(e) => {
                warn!(slot, error = %e, "skipping backup of unreadable record");
                return false;
            }
        };

        let mut timestamp = Utc::now().timestamp_millis();
        let key = loop {
            let candidate = format!("{}{}", Self::backup_prefix(slot), timestamp);
            match self.backend.get(&candidate).await {
                Ok(None) => break candidate,
                Ok(Some(_)) => timestamp += 1,
                Err(e) => {
                    warn!(slot, error = %e, "skipping backup");
                    return false;
                }
            }
        };

        if let Err(e) = self.backend.put(&key, &text).await {
            warn!(slot, error = %e, "backup write failed");
            return false;
        }
        debug!(slot, key = key.as_str(), "backup created");

        if let Err(e) = self.prune_backups(slot, self.config.max_backups).await {
            warn!(slot, error = %e, "backup pruning failed");
        }
        true
    }

    /// Backup keys for a slot, sorted oldest first.
    pub async fn list_backups(&self, slot: &str) -> Result<Vec<String>> {
        let prefix = Self::backup_prefix(slot);
        let mut backups: Vec<(i64, String)> = Vec::new();
        for key in self.backend.keys().await? {
            if let Some(suffix) = key.strip_prefix(&prefix) {
                if let Ok(timestamp) = suffix.parse::<i64>() {
                    backups.push((timestamp, key));
                }
            }
        }
        backups.sort();
        Ok(backups.into_iter().map(|(_, key)| key).collect())
    }

    /// Removes oldest backups until at most `keep` remain. Returns how many
    /// were removed.
    pub async fn prune_backups(&self, slot: &str, keep: usize) -> Result<usize> {
        let backups = self.list_backups(slot).await?;
        if backups.len() <= keep {
            return Ok(0);
        }

        let excess = backups.len() - keep;
        let mut removed = 0;
        for key in backups.into_iter().take(excess) {
            if self.backend.remove(&key).await? {
                removed += 1;
            }
        }
        debug!(slot, removed, "pruned backups");
        Ok(removed)
    }

    /// Loads the record at `slot`.
    ///
    /// On checksum mismatch, missing chunk, or an unparseable or
    /// undecompressable record, tries recovery: newest valid backup first,
    /// then the emergency record, then a checker repair of the primary.
    /// When everything fails this returns `Ok(None)` — the caller decides
    /// whether to start fresh, and corrupted data is never returned.
    pub async fn load(&self, slot: &str, req: LoadRequest) -> Result<Option<LoadedRecord>> {
        match self.try_load(slot, req.verify).await {
            Ok(record) => Ok(record),
            Err(
                e @ (StorageError::ChecksumMismatch { .. }
                | StorageError::MissingChunk { .. }
                | StorageError::CorruptRecord { .. }
                | StorageError::Compression(_)),
            ) => {
                warn!(slot, error = %e, "primary record unusable, attempting recovery");
                self.recover(slot).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_load(&self, slot: &str, verify: bool) -> Result<Option<LoadedRecord>> {
        let Some(text) = self.read_reassembled(slot).await? else {
            return Ok(None);
        };

        let record: SaveRecord =
            serde_json::from_str(&text).map_err(|e| StorageError::CorruptRecord {
                slot: slot.to_string(),
                reason: e.to_string(),
            })?;

        if verify {
            let actual = checksum_of(&record.data)?;
            if actual != record.checksum {
                return Err(StorageError::ChecksumMismatch {
                    expected: record.checksum,
                    actual,
                });
            }
        }

        let data = self.run_consistency_check(slot, record.data)?;

        Ok(Some(LoadedRecord {
            version: record.version,
            timestamp: record.timestamp,
            data,
            recovered: false,
        }))
    }

    /// Opportunistic consistency check; skipped when no checker is attached.
    fn run_consistency_check(&self, slot: &str, data: Value) -> Result<Value> {
        let Some(checker) = &self.checker else {
            return Ok(data);
        };

        let report = checker.check(&data);
        if !report.is_corrupted {
            return Ok(data);
        }

        if let Some(repaired) = checker.repair(&data) {
            warn!(slot, "consistency checker repaired loaded data");
            return Ok(repaired);
        }

        if report.severity >= CorruptionSeverity::Severe {
            return Err(StorageError::CorruptRecord {
                slot: slot.to_string(),
                reason: "consistency check failed and repair was not possible".to_string(),
            });
        }

        warn!(slot, "minor corruption detected, adopting data as-is");
        Ok(data)
    }

    /// Reads the base key and reassembles/decompresses into full-record
    /// JSON text. `Ok(None)` when the slot is empty.
    async fn read_reassembled(&self, slot: &str) -> Result<Option<String>> {
        let Some(raw) = self.backend.get(slot).await? else {
            return Ok(None);
        };
        let text = self.maybe_decompress(raw)?;

        let stored: StoredRecord =
            serde_json::from_str(&text).map_err(|e| StorageError::CorruptRecord {
                slot: slot.to_string(),
                reason: e.to_string(),
            })?;

        match stored {
            StoredRecord::Full(_) => Ok(Some(text)),
            StoredRecord::Index(index) => {
                let mut payload = String::with_capacity(index.total_size);
                for i in 0..index.chunk_count {
                    match self.backend.get(&Self::chunk_key(slot, i)).await? {
                        Some(fragment) => payload.push_str(&fragment),
                        None => {
                            return Err(StorageError::MissingChunk {
                                index: i,
                                count: index.chunk_count,
                            })
                        }
                    }
                }
                Ok(Some(self.maybe_decompress(payload)?))
            }
        }
    }

    fn maybe_decompress(&self, text: String) -> Result<String> {
        if let Some(compressor) = &self.compressor {
            if compressor.is_compressed(&text) {
                return compressor.decompress(&text);
            }
        } else if text.starts_with(crate::compress::COMPRESSION_MARKER) {
            return Err(StorageError::Compression(
                "payload is compressed but no compressor is attached".to_string(),
            ));
        }
        Ok(text)
    }

    /// Recovery chain: newest valid backup, then the emergency record, then
    /// a consistency-checker repair of the primary record as a last resort.
    async fn recover(&self, slot: &str) -> Result<Option<LoadedRecord>> {
        let backups = self.list_backups(slot).await?;
        for key in backups.iter().rev() {
            match self.try_load_record_at(key).await {
                Ok(Some(record)) => {
                    info!(slot, backup = key.as_str(), "recovered from backup");
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(e) => debug!(slot, backup = key.as_str(), error = %e, "backup unusable"),
            }
        }

        let emergency = Self::emergency_key(slot);
        match self.try_load_record_at(&emergency).await {
            Ok(Some(record)) => {
                info!(slot, "recovered from emergency record");
                return Ok(Some(record));
            }
            Ok(None) => {}
            Err(e) => debug!(slot, error = %e, "emergency record unusable"),
        }

        // Last resort: when the primary record still parses, let an
        // attached checker try to repair its checksum-failing data.
        if let Some(checker) = &self.checker {
            if let Ok(Some(text)) = self.read_reassembled(slot).await {
                if let Ok(record) = serde_json::from_str::<SaveRecord>(&text) {
                    if let Some(repaired) = checker.repair(&record.data) {
                        warn!(slot, "adopted checker-repaired primary record");
                        return Ok(Some(LoadedRecord {
                            version: record.version,
                            timestamp: record.timestamp,
                            data: repaired,
                            recovered: true,
                        }));
                    }
                }
            }
        }

        warn!(slot, "recovery exhausted, treating slot as empty");
        Ok(None)
    }

    /// Loads and verifies a self-contained record stored at `key`.
    async fn try_load_record_at(&self, key: &str) -> Result<Option<LoadedRecord>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let text = self.maybe_decompress(raw)?;
        let record: SaveRecord =
            serde_json::from_str(&text).map_err(|e| StorageError::CorruptRecord {
                slot: key.to_string(),
                reason: e.to_string(),
            })?;

        let actual = checksum_of(&record.data)?;
        if actual != record.checksum {
            return Err(StorageError::ChecksumMismatch {
                expected: record.checksum,
                actual,
            });
        }

        Ok(Some(LoadedRecord {
            version: record.version,
            timestamp: record.timestamp,
            data: record.data,
            recovered: true,
        }))
    }

    /// Removes a slot's record and every fragment. Backups are retained and
    /// pruned separately. Returns whether a record existed.
    pub async fn delete(&self, slot: &str) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let existed = self.backend.remove(slot).await?;
        self.clear_stale_chunks(slot, 0).await?;
        info!(slot, existed, "slot deleted");
        Ok(existed)
    }

    /// Lists logical slots, filtering out derived keys (fragments, backups,
    /// emergency records).
    pub async fn list_slots(&self) -> Result<Vec<String>> {
        let mut slots: Vec<String> = self
            .backend
            .keys()
            .await?
            .into_iter()
            .filter(|key| !is_derived_key(key))
            .collect();
        slots.sort();
        Ok(slots)
    }

    /// Produces a portable, self-describing JSON document for a slot.
    pub async fn export(&self, slot: &str) -> Result<Option<String>> {
        let Some(record) = self.load(slot, LoadRequest { verify: true }).await? else {
            return Ok(None);
        };

        let export = ExportRecord {
            version: record.version,
            timestamp: record.timestamp,
            checksum: Some(checksum_of(&record.data)?),
            data: record.data,
        };
        Ok(Some(serde_json::to_string_pretty(&export)?))
    }

    /// Imports a document produced by [`export`](Self::export) (or a
    /// compatible foreign document) into a slot.
    ///
    /// The checksum is verified when present. The record keeps its declared
    /// version; migration happens when a state store loads the slot.
    pub async fn import(&self, json: &str, slot: &str) -> Result<String> {
        let export: ExportRecord = serde_json::from_str(json)?;

        let actual = checksum_of(&export.data)?;
        if let Some(expected) = &export.checksum {
            if expected != &actual {
                return Err(StorageError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let record = SaveRecord {
            version: export.version.clone(),
            timestamp: Utc::now().timestamp_millis(),
            checksum: actual.clone(),
            chunked: false,
            data: export.data,
        };
        let payload = serde_json::to_string(&record)?;

        let _gate = self.write_gate.lock().await;
        self.write_payload(slot, &payload, &record.version, record.timestamp, &actual)
            .await?;
        info!(slot, version = record.version.as_str(), "record imported");
        Ok(record.version)
    }

    /// Best-effort emergency save, bypassing the queue, compression, and
    /// chunking. Intended for abrupt-termination hooks.
    pub async fn save_emergency(&self, slot: &str, data: &Value) -> Result<()> {
        let record = SaveRecord::new(&self.config.version, data.clone())?;
        let payload = serde_json::to_string(&record)?;
        self.backend
            .put(&Self::emergency_key(slot), &payload)
            .await?;
        info!(slot, "emergency record written");
        Ok(())
    }
}

/// Splits a payload into fragments of at most `threshold` bytes, respecting
/// UTF-8 boundaries. For ASCII payloads this yields exactly
/// `len.div_ceil(threshold)` fragments.
fn split_payload(payload: &str, threshold: usize) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut rest = payload;
    while rest.len() > threshold {
        let mut cut = threshold;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        fragments.push(head);
        rest = tail;
    }
    fragments.push(rest);
    fragments
}

/// Returns true for keys derived from a slot (`_chunk_<n>`, `_backup_<ms>`,
/// `_emergency`).
fn is_derived_key(key: &str) -> bool {
    if key.ends_with("_emergency") {
        return true;
    }
    if let Some((_, suffix)) = key.rsplit_once("_chunk_") {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    if let Some((_, suffix)) = key.rsplit_once("_backup_") {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::compress::DeflateCompressor;
    use serde_json::json;
    use vault_models::CorruptionReport;

    fn engine_with(backend: Arc<MemoryBackend>, config: StorageConfig) -> StorageEngine {
        StorageEngine::new(backend, config)
    }

    fn small_config() -> StorageConfig {
        StorageConfig {
            version: "1.0.0".to_string(),
            chunk_threshold: 100,
            max_backups: 3,
        }
    }

    #[test]
    fn test_split_payload_counts() {
        let payload = "x".repeat(350);
        let fragments = split_payload(&payload, 100);
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[3].len(), 50);
        assert_eq!(fragments.concat(), payload);
    }

    #[test]
    fn test_split_payload_respects_char_boundaries() {
        let payload = "灵".repeat(50); // 3 bytes each
        let fragments = split_payload(&payload, 100);
        assert!(fragments.iter().all(|f| f.len() <= 100));
        assert_eq!(fragments.concat(), payload);
    }

    #[test]
    fn test_is_derived_key() {
        assert!(is_derived_key("main_chunk_3"));
        assert!(is_derived_key("main_backup_1712345678901"));
        assert!(is_derived_key("main_emergency"));
        assert!(!is_derived_key("main"));
        assert!(!is_derived_key("my_chunk_slot"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());
        let data = json!({"player": {"jade": 100, "realm": "foundation"}});

        engine.save("main", &data, SaveRequest::default()).await.unwrap();
        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.data, data);
        assert_eq!(loaded.version, "1.0.0");
        assert!(!loaded.recovered);
    }

    #[tokio::test]
    async fn test_load_empty_slot() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());
        assert!(engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_chunked_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), small_config());
        let data = json!({"log": "entry ".repeat(200)});

        let receipt = engine
            .save("main", &data, SaveRequest::default())
            .await
            .unwrap();
        assert!(receipt.chunked);
        assert_eq!(receipt.chunk_count, receipt.bytes.div_ceil(100));

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, data);
    }

    #[tokio::test]
    async fn test_chunked_exact_fragment_count() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), small_config());

        // Size the pad so the serialized payload lands at exactly 3.5x the
        // chunk threshold.
        let probe = SaveRecord::new("1.0.0", json!({"pad": ""})).unwrap();
        let overhead = serde_json::to_string(&probe).unwrap().len();
        let pad = "x".repeat(350 - overhead);
        let data = json!({ "pad": pad });

        let receipt = engine
            .save("main", &data, SaveRequest::default())
            .await
            .unwrap();
        assert_eq!(receipt.bytes, 350);
        assert_eq!(receipt.chunk_count, 4);

        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "main",
                "main_chunk_0",
                "main_chunk_1",
                "main_chunk_2",
                "main_chunk_3"
            ]
        );

        // Deleting the slot removes the index and every fragment.
        assert!(engine.delete("main").await.unwrap());
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shrinking_record_clears_stale_chunks() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), small_config());

        let big = json!({"log": "entry ".repeat(100)});
        engine.save("main", &big, SaveRequest::default()).await.unwrap();
        assert!(backend.get("main_chunk_1").await.unwrap().is_some());

        let small = json!({"log": "tiny"});
        let receipt = engine
            .save("main", &small, SaveRequest { backup: false, ..Default::default() })
            .await
            .unwrap();
        assert!(!receipt.chunked);

        let keys = backend.keys().await.unwrap();
        assert!(keys.iter().all(|k| !k.contains("_chunk_")));
    }

    #[tokio::test]
    async fn test_missing_chunk_is_hard_failure_without_backups() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), small_config());
        let data = json!({"log": "entry ".repeat(200)});

        engine
            .save("main", &data, SaveRequest { backup: false, ..Default::default() })
            .await
            .unwrap();
        backend.remove("main_chunk_1").await.unwrap();

        // No valid backup: recovery exhausts and reports an empty slot,
        // never a partial payload.
        assert!(engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupted_checksum_recovers_from_backup() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default());

        let first = json!({"player": {"jade": 100}});
        engine.save("main", &first, SaveRequest::default()).await.unwrap();

        let second = json!({"player": {"jade": 250}});
        let receipt = engine.save("main", &second, SaveRequest::default()).await.unwrap();
        assert!(receipt.backed_up);

        // Corrupt the primary record's data without fixing its checksum.
        let raw = backend.get("main").await.unwrap().unwrap();
        let tampered = raw.replace("250", "999");
        assert_ne!(raw, tampered);
        backend.put("main", &tampered).await.unwrap();

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.recovered);
        assert_eq!(loaded.data, first);
    }

    #[tokio::test]
    async fn test_corrupted_checksum_without_backup_returns_none() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default());

        let data = json!({"player": {"jade": 250}});
        engine
            .save("main", &data, SaveRequest { backup: false, ..Default::default() })
            .await
            .unwrap();

        let raw = backend.get("main").await.unwrap().unwrap();
        backend
            .put("main", &raw.replace("250", "999"))
            .await
            .unwrap();

        assert!(engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupted_compressed_record_recovers_from_backup() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default())
            .with_compressor(Arc::new(DeflateCompressor::new()));

        let first = json!({"player": {"jade": 100}});
        engine
            .save("main", &first, SaveRequest { compress: true, ..Default::default() })
            .await
            .unwrap();
        let second = json!({"player": {"jade": 250}});
        engine
            .save("main", &second, SaveRequest { compress: true, ..Default::default() })
            .await
            .unwrap();

        // Smash one byte of the compressed payload so decoding itself fails.
        let raw = backend.get("main").await.unwrap().unwrap();
        let mut tampered = raw.into_bytes();
        tampered[10] = b'!';
        backend
            .put("main", &String::from_utf8(tampered).unwrap())
            .await
            .unwrap();

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.recovered);
        assert_eq!(loaded.data, first);
    }

    #[tokio::test]
    async fn test_corrupted_compressed_record_without_backup_returns_none() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default())
            .with_compressor(Arc::new(DeflateCompressor::new()));

        engine
            .save(
                "main",
                &json!({"player": {"jade": 250}}),
                SaveRequest { compress: true, backup: false, ..Default::default() },
            )
            .await
            .unwrap();

        let raw = backend.get("main").await.unwrap().unwrap();
        let mut tampered = raw.into_bytes();
        tampered[10] = b'!';
        backend
            .put("main", &String::from_utf8(tampered).unwrap())
            .await
            .unwrap();

        assert!(engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recovery_falls_back_to_checker_repair() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default())
            .with_consistency_checker(Arc::new(JadeChecker));

        engine
            .save(
                "main",
                &json!({"player": {"jade": 250}}),
                SaveRequest { backup: false, ..Default::default() },
            )
            .await
            .unwrap();

        // Checksum-failing primary, no backups, no emergency record: the
        // checker's repair is the last stop before giving up.
        let raw = backend.get("main").await.unwrap().unwrap();
        backend
            .put("main", &raw.replace("250", "999"))
            .await
            .unwrap();

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.recovered);
        assert_eq!(loaded.data, json!({"player": {"jade": 0}}));
    }

    #[tokio::test]
    async fn test_unparseable_record_recovers_from_emergency() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default());

        let data = json!({"player": {"jade": 7}});
        engine.save_emergency("main", &data).await.unwrap();
        backend.put("main", "not json at all").await.unwrap();

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.recovered);
        assert_eq!(loaded.data, data);
    }

    #[tokio::test]
    async fn test_backup_rotation_caps_count() {
        let backend = Arc::new(MemoryBackend::new());
        let config = StorageConfig {
            max_backups: 2,
            ..StorageConfig::default()
        };
        let engine = engine_with(backend, config);

        for jade in 0..5 {
            engine
                .save("main", &json!({"jade": jade}), SaveRequest::default())
                .await
                .unwrap();
        }

        let backups = engine.list_backups("main").await.unwrap();
        assert_eq!(backups.len(), 2);
    }

    #[tokio::test]
    async fn test_quota_reclaims_backups_and_retries() {
        let data = json!({"player": {"jade": 42}});

        // Measure the payload size for this tree.
        let probe_backend = Arc::new(MemoryBackend::new());
        let probe = engine_with(probe_backend, StorageConfig::default());
        let bytes = probe
            .save("main", &data, SaveRequest::default())
            .await
            .unwrap()
            .bytes;

        let backend = Arc::new(MemoryBackend::with_capacity(bytes * 2));
        let engine = engine_with(backend.clone(), StorageConfig::default());

        // A stale backup hogs most of the quota.
        let junk = "j".repeat(bytes + bytes / 2);
        backend.put("main_backup_1000", &junk).await.unwrap();

        let receipt = engine
            .save("main", &data, SaveRequest { backup: false, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(receipt.bytes, bytes);
        assert!(backend.get("main_backup_1000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compressed_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), StorageConfig::default())
            .with_compressor(Arc::new(DeflateCompressor::new()));

        let data = json!({"log": "entry ".repeat(500)});
        engine
            .save("main", &data, SaveRequest { compress: true, ..Default::default() })
            .await
            .unwrap();

        let stored = backend.get("main").await.unwrap().unwrap();
        assert!(stored.starts_with(crate::compress::COMPRESSION_MARKER));

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, data);
    }

    #[tokio::test]
    async fn test_save_idempotence() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());
        let data = json!({"a": [1, 2, 3]});

        let first = engine.save("main", &data, SaveRequest::default()).await.unwrap();
        let second = engine.save("main", &data, SaveRequest::default()).await.unwrap();
        assert_eq!(first.checksum, second.checksum);

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, data);
    }

    #[tokio::test]
    async fn test_concurrent_saves_serialize() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = Arc::new(engine_with(backend, small_config()));

        let a = json!({"log": "alpha ".repeat(100)});
        let b = json!({"log": "beta ".repeat(120)});

        let (ra, rb) = tokio::join!(
            engine.save("main", &a, SaveRequest { backup: false, ..Default::default() }),
            engine.save("main", &b, SaveRequest { backup: false, ..Default::default() }),
        );
        ra.unwrap();
        rb.unwrap();

        // Whichever save ran second, the slot must hold one complete,
        // checksum-valid record.
        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.data == a || loaded.data == b);
    }

    #[tokio::test]
    async fn test_list_slots_filters_derived_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, small_config());

        engine
            .save("main", &json!({"log": "entry ".repeat(100)}), SaveRequest::default())
            .await
            .unwrap();
        engine
            .save("profile2", &json!({"a": 1}), SaveRequest::default())
            .await
            .unwrap();
        engine.save_emergency("main", &json!({"a": 1})).await.unwrap();

        assert_eq!(engine.list_slots().await.unwrap(), vec!["main", "profile2"]);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());
        let data = json!({"player": {"jade": 5}});

        engine.save("main", &data, SaveRequest::default()).await.unwrap();
        let exported = engine.export("main").await.unwrap().unwrap();

        let version = engine.import(&exported, "restored").await.unwrap();
        assert_eq!(version, "1.0.0");

        let loaded = engine
            .load("restored", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, data);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_checksum() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());

        let doc = r#"{"version":"1.0.0","timestamp":1,"checksum":"crc32:deadbeef","data":{"a":1}}"#;
        let result = engine.import(doc, "main").await;
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn test_import_without_checksum_accepted() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default());

        let doc = r#"{"version":"0.9.0","timestamp":1,"data":{"a":1}}"#;
        let version = engine.import(doc, "main").await.unwrap();
        assert_eq!(version, "0.9.0");

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.version, "0.9.0");
        assert_eq!(loaded.data, json!({"a": 1}));
    }

    struct JadeChecker;

    impl ConsistencyChecker for JadeChecker {
        fn check(&self, data: &Value) -> CorruptionReport {
            let jade = data.pointer("/player/jade").and_then(Value::as_i64);
            match jade {
                Some(j) if j < 0 => CorruptionReport::corrupted(CorruptionSeverity::Minor),
                _ => CorruptionReport::clean(),
            }
        }

        fn repair(&self, data: &Value) -> Option<Value> {
            let mut fixed = data.clone();
            *fixed.pointer_mut("/player/jade")? = json!(0);
            Some(fixed)
        }
    }

    #[tokio::test]
    async fn test_consistency_checker_repairs_on_load() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, StorageConfig::default())
            .with_consistency_checker(Arc::new(JadeChecker));

        engine
            .save("main", &json!({"player": {"jade": -5}}), SaveRequest::default())
            .await
            .unwrap();

        let loaded = engine
            .load("main", LoadRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, json!({"player": {"jade": 0}}));
    }
}
