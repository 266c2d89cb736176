//! Version-graph migration engine.
//!
//! Migrations are registered as directed edges between version strings. The
//! graph is kept acyclic at registration time, and a migration request is
//! resolved to the shortest edge chain (breadth-first, ties broken by
//! registration order) and applied step by step. Each run is recorded in an
//! in-memory history; runs that requested a backup can be rolled back from
//! it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use vault_models::{ConsistencyChecker, MigrationId, MigrationRecord};

use crate::error::{MigrationError, Result};

/// A migration step: transforms a state tree from one version to the next.
/// A returned `Err` aborts the run with the given reason.
pub type MigrateFn = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Options for a migration run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Run the consistency checker (when attached) over the result.
    pub validate: bool,
    /// Keep the pre-migration tree in the history record.
    pub backup: bool,
    /// On a failed post-chain check, restore the pre-migration tree.
    pub rollback_on_failure: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            validate: true,
            backup: true,
            rollback_on_failure: true,
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// The resulting tree: migrated data on success, the original input
    /// when the run was rejected after the chain ran.
    pub data: Value,
    /// Version the run started at.
    pub from: String,
    /// Version the run targeted.
    pub to: String,
    /// Edge chain that was applied, in order.
    pub applied: Vec<(String, String)>,
    /// Whether the migrated result was adopted.
    pub success: bool,
    /// History id of this run, when one was recorded.
    pub migration_id: Option<MigrationId>,
}

struct Edge {
    from: String,
    to: String,
    migrate: MigrateFn,
    rollback: Option<MigrateFn>,
}

/// Engine owning the version graph and migration history.
#[derive(Default)]
pub struct MigrationEngine {
    /// Registration order doubles as the BFS tie-break.
    edges: Vec<Edge>,
    checker: Option<Arc<dyn ConsistencyChecker>>,
    history: Vec<MigrationRecord>,
}

impl MigrationEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a consistency checker consulted after each migration chain.
    pub fn with_consistency_checker(mut self, checker: Arc<dyn ConsistencyChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Registers a migration edge.
    ///
    /// Rejects self-edges, duplicate edges, and any edge that would make the
    /// version graph cyclic. The optional `rollback` transform is kept for
    /// [`rollback_migration`](Self::rollback_migration) fallbacks by callers
    /// that did not capture a backup.
    pub fn register(
        &mut self,
        from: &str,
        to: &str,
        migrate: MigrateFn,
        rollback: Option<MigrateFn>,
    ) -> Result<()> {
        if from == to {
            return Err(MigrationError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if self.edges.iter().any(|e| e.from == from && e.to == to) {
            return Err(MigrationError::DuplicateEdge {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        // The new edge closes a cycle exactly when `to` already reaches
        // `from`.
        if self.find_chain(to, from).is_some() {
            return Err(MigrationError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!(from, to, "registered migration edge");
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            migrate,
            rollback,
        });
        Ok(())
    }

    /// Breadth-first search for the shortest edge chain between versions.
    /// Returns edge indices in application order, or `None` when `to` is
    /// unreachable. `from == to` yields an empty chain.
    fn find_chain(&self, from: &str, to: &str) -> Option<Vec<usize>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut visited = vec![from.to_string()];
        let mut frontier = vec![from.to_string()];
        // Edge index that first discovered each version.
        let mut discovered_by: Vec<(String, usize)> = Vec::new();

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for version in &frontier {
                for (i, edge) in self.edges.iter().enumerate() {
                    if edge.from != *version || visited.contains(&edge.to) {
                        continue;
                    }
                    visited.push(edge.to.clone());
                    discovered_by.push((edge.to.clone(), i));
                    if edge.to == to {
                        return Some(self.reconstruct_chain(&discovered_by, from, to));
                    }
                    next.push(edge.to.clone());
                }
            }
            frontier = next;
        }
        None
    }

    fn reconstruct_chain(
        &self,
        discovered_by: &[(String, usize)],
        from: &str,
        to: &str,
    ) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = to.to_string();
        while cursor != from {
            let Some((_, edge_index)) = discovered_by.iter().find(|(v, _)| *v == cursor) else {
                break;
            };
            chain.push(*edge_index);
            cursor = self.edges[*edge_index].from.clone();
        }
        chain.reverse();
        chain
    }

    /// Migrates `data` from one version to another.
    ///
    /// `from == to` is an identity fast-path. A failing step aborts with
    /// [`MigrationError::StepFailed`] and never touches the caller's data.
    /// A post-chain consistency failure that cannot be repaired reports
    /// `success: false` and hands back the original input.
    pub fn migrate(
        &mut self,
        data: &Value,
        from: &str,
        to: &str,
        opts: MigrateOptions,
    ) -> Result<MigrationOutcome> {
        if from == to {
            return Ok(MigrationOutcome {
                data: data.clone(),
                from: from.to_string(),
                to: to.to_string(),
                applied: Vec::new(),
                success: true,
                migration_id: None,
            });
        }

        let chain = self
            .find_chain(from, to)
            .ok_or_else(|| MigrationError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        let backup = opts.backup.then(|| data.clone());
        let mut current = data.clone();
        let mut applied = Vec::new();

        for index in &chain {
            let edge = &self.edges[*index];
            debug!(from = edge.from.as_str(), to = edge.to.as_str(), "applying migration step");
            current = (edge.migrate)(current).map_err(|reason| MigrationError::StepFailed {
                from: edge.from.clone(),
                to: edge.to.clone(),
                reason,
            })?;
            if !current.is_object() {
                return Err(MigrationError::StepFailed {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    reason: "step produced a non-object tree".to_string(),
                });
            }
            applied.push((edge.from.clone(), edge.to.clone()));
        }

        let mut success = true;
        if opts.validate {
            if let Some(checker) = &self.checker {
                let report = checker.check(&current);
                if report.is_corrupted {
                    if let Some(repaired) = checker.repair(&current) {
                        warn!(from, to, "migrated tree repaired by consistency checker");
                        current = repaired;
                    } else {
                        warn!(from, to, "migrated tree failed consistency check, keeping original");
                        success = false;
                        current = match (&backup, opts.rollback_on_failure) {
                            (Some(saved), true) => saved.clone(),
                            _ => data.clone(),
                        };
                    }
                }
            }
        }

        let id = MigrationId::new();
        self.history.push(MigrationRecord {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            applied: applied.clone(),
            backup,
            success,
            timestamp: Utc::now(),
        });
        info!(from, to, steps = applied.len(), success, "migration run recorded");

        Ok(MigrationOutcome {
            data: current,
            from: from.to_string(),
            to: to.to_string(),
            applied,
            success,
            migration_id: Some(id),
        })
    }

    /// Whether a chain exists between the two versions.
    pub fn can_migrate(&self, from: &str, to: &str) -> bool {
        self.find_chain(from, to).is_some()
    }

    /// Every version reachable from `from`, in breadth-first order.
    pub fn available_targets(&self, from: &str) -> Vec<String> {
        let mut targets = Vec::new();
        let mut frontier = vec![from.to_string()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for version in &frontier {
                for edge in &self.edges {
                    if edge.from == *version
                        && edge.to != from
                        && !targets.contains(&edge.to)
                    {
                        targets.push(edge.to.clone());
                        next.push(edge.to.clone());
                    }
                }
            }
            frontier = next;
        }
        targets
    }

    /// Resolves the edge chain that a migration between the two versions
    /// would apply, without running anything.
    pub fn validate_path(&self, from: &str, to: &str) -> Result<Vec<(String, String)>> {
        let chain = self
            .find_chain(from, to)
            .ok_or_else(|| MigrationError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        Ok(chain
            .into_iter()
            .map(|i| (self.edges[i].from.clone(), self.edges[i].to.clone()))
            .collect())
    }

    /// Returns the pre-migration tree captured for a past run.
    pub fn rollback_migration(&self, id: &MigrationId) -> Result<Value> {
        self.history
            .iter()
            .find(|record| &record.id == id)
            .and_then(|record| record.backup.clone())
            .ok_or_else(|| MigrationError::UnknownMigration(id.to_string()))
    }

    /// The reverse transform registered for an edge, when one exists.
    pub fn rollback_fn(&self, from: &str, to: &str) -> Option<MigrateFn> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.to == to)
            .and_then(|e| e.rollback.clone())
    }

    /// All recorded migration runs, oldest first.
    pub fn history(&self) -> &[MigrationRecord] {
        &self.history
    }
}
