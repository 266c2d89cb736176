//! The validated state container.
//!
//! A [`StateStore`] owns the canonical state tree. Every mutation goes
//! through the same pipeline: build a candidate tree, run every validation
//! rule against it, and only then commit, diff, and notify subscribers.
//! A rejected candidate leaves the state byte-for-byte untouched.
//!
//! Persistence and migration are collaborators injected after construction;
//! the store itself never touches a storage medium directly.

use std::collections::VecDeque;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use vault_migration::{MigrateOptions, MigrationEngine};
use vault_models::{
    deep_merge, diff, get_path, set_path, Change, Path, Snapshot, SnapshotId, SnapshotSource,
};
use vault_storage::{LoadRequest, SaveReceipt, SaveRequest, StorageEngine};

use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::subscription::{Listener, SubscriberSet, SubscriptionId};
use crate::validation::{ValidationRule, ValidatorFn};

/// A state mutation.
pub enum Update {
    /// Deep-merge a patch into the tree: objects merge recursively, any
    /// non-object leaf is replaced.
    Merge(Value),
    /// Transform a copy of the tree with a closure; the result becomes the
    /// candidate.
    With(Box<dyn FnOnce(Value) -> Value + Send>),
}

/// What kind of update this is, for auto-save purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateSource {
    /// Routine update.
    #[default]
    Normal,
    /// Update that should trigger an auto-save regardless of counters
    /// (level-up, purchase, anything the host deems worth persisting now).
    Significant,
}

/// Options for an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Auto-save significance of this update.
    pub source: UpdateSource,
}

/// Options for a save.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Save even when there are no unsaved changes.
    pub force: bool,
    /// Compress the payload (requires a compressor on the engine).
    pub compress: bool,
    /// Back up the existing record before overwriting.
    pub backup: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            force: false,
            compress: false,
            backup: true,
        }
    }
}

/// Result of a save request.
#[derive(Debug)]
pub enum SaveOutcome {
    /// A record was written.
    Saved(SaveReceipt),
    /// Nothing was dirty and `force` was off.
    Skipped,
}

/// Options for a load.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Migrate the record when its version differs from the engine's.
    pub migrate: bool,
    /// Checksum-verify the record (with automatic recovery on mismatch).
    pub verify: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            migrate: true,
            verify: true,
        }
    }
}

/// Result of a load request.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A record was adopted as the new in-memory state.
    Adopted {
        /// Version the state is now at.
        version: String,
        /// Whether a migration chain ran.
        migrated: bool,
        /// Whether the data came from a backup or emergency record.
        recovered: bool,
        /// Diff against the previous in-memory state.
        changes: Vec<Change>,
    },
    /// No record existed; the in-memory state is untouched.
    Empty,
}

/// Validated state container with snapshots, subscriptions, and optional
/// persistence.
pub struct StateStore {
    state: Value,
    default_template: Value,
    config: StateConfig,
    rules: Vec<ValidationRule>,
    subscribers: SubscriberSet,
    snapshots: VecDeque<Snapshot>,
    storage: Option<StorageEngine>,
    migrations: Option<MigrationEngine>,
    dirty: bool,
    unsaved_updates: usize,
    last_save: Instant,
    last_autosave: Option<Instant>,
    autosave_pending: bool,
}

impl StateStore {
    /// Creates a store whose initial state is a copy of `default_template`.
    pub fn new(default_template: Value, config: StateConfig) -> Self {
        Self {
            state: default_template.clone(),
            default_template,
            config,
            rules: Vec::new(),
            subscribers: SubscriberSet::default(),
            snapshots: VecDeque::new(),
            storage: None,
            migrations: None,
            dirty: false,
            unsaved_updates: 0,
            last_save: Instant::now(),
            last_autosave: None,
            autosave_pending: false,
        }
    }

    /// Attaches the storage engine used by save, load, export, and import.
    pub fn attach_storage(&mut self, engine: StorageEngine) {
        self.storage = Some(engine);
    }

    /// Attaches the migration engine consulted when a loaded record's
    /// version differs from the storage engine's.
    pub fn attach_migrations(&mut self, engine: MigrationEngine) {
        self.migrations = Some(engine);
    }

    /// A deep copy of the current state tree.
    pub fn state(&self) -> Value {
        self.state.clone()
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reads the value at a dotted path. `None` when the path does not
    /// resolve. No side effects.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let parsed = Path::parse(path)?;
        Ok(get_path(&self.state, &parsed).cloned())
    }

    /// Applies an update through the validation pipeline.
    ///
    /// Returns the structural diff the update produced. On a validation
    /// failure the state is untouched and no subscriber fires.
    pub fn update(&mut self, update: Update, opts: UpdateOptions) -> Result<Vec<Change>> {
        let candidate = match update {
            Update::Merge(patch) => {
                let mut candidate = self.state.clone();
                deep_merge(&mut candidate, &patch);
                candidate
            }
            Update::With(transform) => transform(self.state.clone()),
        };
        self.commit(candidate, opts)
    }

    /// Sets the value at a dotted path.
    pub fn set(&mut self, path: &str, value: Value, opts: UpdateOptions) -> Result<Vec<Change>> {
        let parsed = Path::parse(path)?;
        let mut candidate = self.state.clone();
        set_path(&mut candidate, &parsed, value)?;
        self.commit(candidate, opts)
    }

    /// Adds `delta` to the numeric leaf at a dotted path. A missing leaf
    /// counts as zero; a non-numeric leaf is [`StateError::NotANumber`].
    pub fn increment(&mut self, path: &str, delta: i64, opts: UpdateOptions) -> Result<Vec<Change>> {
        let parsed = Path::parse(path)?;

        let next = match get_path(&self.state, &parsed) {
            None | Some(Value::Null) => Value::from(delta),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    let sum = i.checked_add(delta).ok_or_else(|| StateError::Overflow {
                        path: path.to_string(),
                    })?;
                    Value::from(sum)
                } else if let Some(f) = n.as_f64() {
                    serde_json::Number::from_f64(f + delta as f64)
                        .map(Value::Number)
                        .ok_or_else(|| StateError::NotANumber {
                            path: path.to_string(),
                        })?
                } else {
                    return Err(StateError::NotANumber {
                        path: path.to_string(),
                    });
                }
            }
            Some(_) => {
                return Err(StateError::NotANumber {
                    path: path.to_string(),
                })
            }
        };

        let mut candidate = self.state.clone();
        set_path(&mut candidate, &parsed, next)?;
        self.commit(candidate, opts)
    }

    /// Validate-then-commit pipeline shared by every mutation.
    fn commit(&mut self, candidate: Value, opts: UpdateOptions) -> Result<Vec<Change>> {
        if !candidate.is_object() {
            return Err(StateError::NonObjectRoot);
        }
        for rule in &self.rules {
            rule.check(&candidate)?;
        }

        let changes = diff(&self.state, &candidate);
        if changes.is_empty() {
            debug!("update produced no changes");
            return Ok(changes);
        }

        self.state = candidate;
        self.dirty = true;
        self.unsaved_updates += 1;
        // Synchronous dispatch: every listener sees this diff before any
        // later update can run.
        self.subscribers.notify(&changes);
        self.evaluate_autosave(opts.source);
        Ok(changes)
    }

    /// Registers a validation rule at a dotted path. Rules accumulate;
    /// every rule must pass for a candidate to commit.
    pub fn add_validation(
        &mut self,
        path: &str,
        predicate: ValidatorFn,
        message: impl Into<String>,
    ) -> Result<()> {
        let parsed = Path::parse(path)?;
        self.rules.push(ValidationRule::new(parsed, predicate, message));
        Ok(())
    }

    /// Registers a change listener, optionally scoped to a dotted path.
    /// Scoped listeners fire when a change path is at, under, or above
    /// their scope.
    pub fn subscribe(&mut self, listener: Listener, scope: Option<&str>) -> Result<SubscriptionId> {
        let scope = scope.map(Path::parse).transpose()?;
        Ok(self.subscribers.subscribe(listener, scope))
    }

    /// Removes a listener. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Takes a manual snapshot of the current state.
    pub fn create_snapshot(&mut self, label: Option<&str>) -> SnapshotId {
        self.take_snapshot(label, SnapshotSource::Manual)
    }

    fn take_snapshot(&mut self, label: Option<&str>, source: SnapshotSource) -> SnapshotId {
        let snapshot = Snapshot::new(self.state.clone(), label.map(str::to_string), source);
        let id = snapshot.id.clone();
        if self.snapshots.len() == self.config.snapshot_capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        debug!(id = %id, "snapshot taken");
        id
    }

    /// Snapshots currently in the ring, oldest first.
    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Restores a snapshot (the newest when `id` is `None`).
    ///
    /// The pre-rollback state is snapshotted first, so a rollback is itself
    /// reversible. The restored tree goes through the normal validation and
    /// notification pipeline.
    pub fn rollback(&mut self, id: Option<&SnapshotId>) -> Result<Vec<Change>> {
        let restored = match id {
            Some(id) => self
                .snapshots
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| StateError::SnapshotNotFound(id.to_string()))?
                .state
                .clone(),
            None => self
                .snapshots
                .back()
                .ok_or_else(|| StateError::SnapshotNotFound("latest".to_string()))?
                .state
                .clone(),
        };

        self.take_snapshot(Some("pre-rollback"), SnapshotSource::Automatic);
        self.commit(restored, UpdateOptions::default())
    }

    /// Reinstalls the default template, snapshotting the outgoing state
    /// first.
    pub fn reset(&mut self) -> Result<Vec<Change>> {
        info!("resetting state to default template");
        self.take_snapshot(Some("pre-reset"), SnapshotSource::Automatic);
        let template = self.default_template.clone();
        self.commit(template, UpdateOptions::default())
    }

    /// Persists the current state to the configured slot.
    ///
    /// Skipped (successfully) when nothing is dirty, unless `force`.
    pub async fn save(&mut self, opts: SaveOptions) -> Result<SaveOutcome> {
        let storage = self.storage.as_ref().ok_or(StateError::NoStorage)?;
        if !self.dirty && !opts.force {
            debug!("save skipped, no unsaved changes");
            return Ok(SaveOutcome::Skipped);
        }

        let receipt = storage
            .save(
                &self.config.slot,
                &self.state,
                SaveRequest {
                    compress: opts.compress,
                    backup: opts.backup,
                    verify: false,
                },
            )
            .await?;

        self.dirty = false;
        self.unsaved_updates = 0;
        self.last_save = Instant::now();
        self.autosave_pending = false;
        Ok(SaveOutcome::Saved(receipt))
    }

    /// Loads the configured slot, migrating when needed, and adopts the
    /// result as the in-memory state.
    ///
    /// An absent record leaves the current (default) state in place. A
    /// failed migration or validation leaves the in-memory state untouched
    /// and reports the failure.
    pub async fn load(&mut self, opts: LoadOptions) -> Result<LoadOutcome> {
        let storage = self.storage.as_ref().ok_or(StateError::NoStorage)?;
        let expected = storage.version().to_string();

        let Some(record) = storage
            .load(&self.config.slot, LoadRequest { verify: opts.verify })
            .await?
        else {
            debug!(slot = self.config.slot.as_str(), "no record to load");
            return Ok(LoadOutcome::Empty);
        };

        let mut data = record.data;
        let mut migrated = false;
        if record.version != expected {
            if !opts.migrate {
                return Err(StateError::VersionMismatch {
                    found: record.version,
                    expected,
                });
            }
            let migrations = self.migrations.as_mut().ok_or(StateError::NoMigrations)?;
            let outcome =
                migrations.migrate(&data, &record.version, &expected, MigrateOptions::default())?;
            if !outcome.success {
                return Err(StateError::MigrationRejected {
                    from: record.version,
                    to: expected,
                });
            }
            data = outcome.data;
            migrated = true;
        }

        if !data.is_object() {
            return Err(StateError::NonObjectRoot);
        }
        for rule in &self.rules {
            rule.check(&data)?;
        }

        self.take_snapshot(Some("pre-load"), SnapshotSource::Automatic);
        let changes = diff(&self.state, &data);
        self.state = data;
        // A migrated tree differs from what is on disk until the next save.
        self.dirty = migrated;
        self.unsaved_updates = 0;
        self.subscribers.notify(&changes);
        info!(
            slot = self.config.slot.as_str(),
            migrated,
            recovered = record.recovered,
            "record loaded"
        );

        Ok(LoadOutcome::Adopted {
            version: expected,
            migrated,
            recovered: record.recovered,
            changes,
        })
    }

    /// Exports a slot (the configured one by default) as a portable JSON
    /// document.
    pub async fn export_slot(&self, slot: Option<&str>) -> Result<String> {
        let storage = self.storage.as_ref().ok_or(StateError::NoStorage)?;
        let slot = slot.unwrap_or(&self.config.slot);
        storage
            .export(slot)
            .await?
            .ok_or_else(|| StateError::EmptySlot(slot.to_string()))
    }

    /// Imports a document into a slot (the configured one by default).
    ///
    /// When the target is the configured slot the imported record is then
    /// loaded — migrating if its version differs — and adopted. Importing
    /// into another slot never touches the in-memory state and reports
    /// [`LoadOutcome::Empty`].
    pub async fn import_slot(&mut self, json: &str, slot: Option<&str>) -> Result<LoadOutcome> {
        let slot_name = slot.unwrap_or(&self.config.slot).to_string();
        {
            let storage = self.storage.as_ref().ok_or(StateError::NoStorage)?;
            storage.import(json, &slot_name).await?;
        }

        if slot_name == self.config.slot {
            self.load(LoadOptions::default()).await
        } else {
            Ok(LoadOutcome::Empty)
        }
    }

    /// Host suspend/background hook: forced save, falling back to the
    /// engine's emergency record when the save fails.
    pub async fn handle_suspend(&mut self) -> Result<()> {
        if self.storage.is_none() {
            return Ok(());
        }

        let result = self
            .save(SaveOptions {
                force: true,
                ..SaveOptions::default()
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "suspend save failed, writing emergency record");
            if let Some(storage) = &self.storage {
                storage
                    .save_emergency(&self.config.slot, &self.state)
                    .await?;
            }
        }
        Ok(())
    }

    fn evaluate_autosave(&mut self, source: UpdateSource) {
        let policy = &self.config.autosave;
        if !policy.enabled || self.storage.is_none() || self.autosave_pending {
            return;
        }

        let due = source == UpdateSource::Significant
            || self.unsaved_updates >= policy.update_threshold
            || self.last_save.elapsed() >= policy.interval;
        if due {
            debug!("auto-save pending");
            self.autosave_pending = true;
        }
    }

    /// Drives the auto-save policy. Hosts call this from their tick or idle
    /// loop; at most one save happens per debounce window, so bursts of
    /// triggers coalesce into a single write.
    pub async fn poll_autosave(&mut self) -> Result<Option<SaveReceipt>> {
        if self.storage.is_none() || !self.config.autosave.enabled {
            return Ok(None);
        }

        if !self.autosave_pending {
            let interval_due =
                self.dirty && self.last_save.elapsed() >= self.config.autosave.interval;
            if !interval_due {
                return Ok(None);
            }
            self.autosave_pending = true;
        }

        if let Some(last) = self.last_autosave {
            if last.elapsed() < self.config.autosave.debounce {
                return Ok(None);
            }
        }
        self.last_autosave = Some(Instant::now());

        match self.save(SaveOptions::default()).await? {
            SaveOutcome::Saved(receipt) => {
                info!(slot = self.config.slot.as_str(), "auto-save complete");
                Ok(Some(receipt))
            }
            SaveOutcome::Skipped => {
                self.autosave_pending = false;
                Ok(None)
            }
        }
    }
}
