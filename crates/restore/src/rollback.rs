//! Snapshot-before, merge-back-on-failure protection for destructive
//! operations.
//!
//! Recovery is coarse: the pre-operation snapshot is merged (never
//! replaced) on top of whatever the failed operation left behind. The
//! caller always sees the operation's own error; the rollback outcome
//! rides along as a summary.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use campus_store::ModelRegistry;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::backup::export;
use crate::clock;
use crate::codec::{self, SnapshotRecord};
use crate::config::RestoreConfig;
use crate::error::RestoreError;
use crate::job::new_job_id;
use crate::order::DependencyOrderer;
use crate::progress::{OperationType, ProgressTracker};
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::report::{BatchOutcome, DuplicateStrategy, OutcomeCounts, RestoreMode};

const SNAPSHOT_PREFIX: &str = "pre_";

/// What the merge-back after a failed operation achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSummary {
    /// The snapshot file that was merged back.
    pub snapshot: String,
    /// False when the snapshot could not be read or decoded.
    pub completed: bool,
    pub merged: OutcomeCounts,
    /// Records that could not be merged back.
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A protected operation's failure: its own error plus the rollback
/// attempt, if a snapshot had been taken.
#[derive(Debug)]
pub struct OperationFailed<E> {
    pub error: E,
    pub rollback: Option<RollbackSummary>,
}

pub struct RollbackManager<'a, R: ModelRegistry> {
    registry: &'a R,
    config: &'a RestoreConfig,
    progress: Option<&'a ProgressTracker>,
}

impl<'a, R: ModelRegistry> RollbackManager<'a, R> {
    pub fn new(registry: &'a R, config: &'a RestoreConfig) -> Self {
        RollbackManager {
            registry,
            config,
            progress: None,
        }
    }

    /// Report merge-back progress under `OperationType::Rollback`.
    pub fn with_progress(mut self, progress: &'a ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    fn orderer(&self) -> DependencyOrderer {
        DependencyOrderer::new(self.config.dependency_order.clone())
    }

    /// Run `work` under rollback protection.
    ///
    /// `work` is not polled until the snapshot exists; if the snapshot
    /// cannot be captured, `work` is dropped without running. On success
    /// old snapshots are pruned to the retention limit.
    pub async fn with_rollback_protection<T, E, Fut>(
        &self,
        operation: &str,
        create_snapshot: bool,
        work: Fut,
    ) -> Result<T, OperationFailed<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + From<RestoreError>,
    {
        let snapshot = if create_snapshot {
            match self.capture(operation).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!(operation, error = %e, "pre-operation snapshot failed; operation not run");
                    return Err(OperationFailed {
                        error: E::from(e),
                        rollback: None,
                    });
                }
            }
        } else {
            None
        };

        match work.await {
            Ok(value) => {
                if snapshot.is_some() {
                    if let Err(e) = self.prune() {
                        warn!(error = %e, "snapshot retention pruning failed");
                    }
                }
                Ok(value)
            }
            Err(err) => {
                error!(operation, error = %err, "operation failed");
                let rollback = match snapshot {
                    Some(path) => Some(self.merge_back(&path).await),
                    None => None,
                };
                Err(OperationFailed {
                    error: err,
                    rollback,
                })
            }
        }
    }

    /// Export every allow-listed entity type to a fresh snapshot file.
    pub async fn capture(&self, operation: &str) -> Result<PathBuf, RestoreError> {
        let types: Vec<String> = self
            .registry
            .entity_types()
            .await?
            .into_iter()
            .filter(|t| self.config.is_allowed(t))
            .collect();
        let ordered = self.orderer().order(&types);
        let records = export(self.registry, &ordered).await?;
        let bytes = codec::encode(&records)?;

        let dir = &self.config.snapshot_dir;
        std::fs::create_dir_all(dir).map_err(|e| RestoreError::io(dir, e))?;
        let short_id: String = new_job_id().chars().take(8).collect();
        let path = dir.join(format!(
            "{}{}_{}_{}.json",
            SNAPSHOT_PREFIX,
            operation,
            clock::compact(clock::now()),
            short_id
        ));
        std::fs::write(&path, &bytes).map_err(|e| RestoreError::io(&path, e))?;
        info!(path = %path.display(), records = records.len(), "captured pre-operation snapshot");
        Ok(path)
    }

    /// Merge a snapshot back into the store, duplicates updated, entity
    /// types in dependency order. Never fails; the summary says how it went.
    pub async fn merge_back(&self, path: &Path) -> RollbackSummary {
        let mut summary = RollbackSummary {
            snapshot: path.display().to_string(),
            completed: false,
            merged: OutcomeCounts::default(),
            error_count: 0,
            error: None,
        };

        let snapshot = match std::fs::read(path)
            .map_err(|e| RestoreError::io(path, e))
            .and_then(|bytes| codec::decode(&bytes).map_err(RestoreError::from))
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(path = %path.display(), error = %e, "rollback failed: snapshot unreadable");
                summary.error = Some(e.to_string());
                return summary;
            }
        };

        let mut groups: BTreeMap<String, Vec<SnapshotRecord>> = BTreeMap::new();
        let mut seen = Vec::new();
        for record in snapshot.records {
            if !groups.contains_key(&record.entity_type) {
                seen.push(record.entity_type.clone());
            }
            groups.entry(record.entity_type.clone()).or_default().push(record);
        }
        let ordered = self.orderer().order(&seen);

        let handle = self.progress.map(|p| {
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            p.start(&id, OperationType::Rollback, ordered.len() as u64)
        });

        let mut reconciler = Reconciler::new(
            self.registry,
            ReconcileOptions {
                mode: RestoreMode::Merge,
                duplicate_strategy: DuplicateStrategy::Update,
                dry_run: false,
                chunk_size: self.config.chunk_size,
            },
        );
        for entity_type in &ordered {
            let records = groups.remove(entity_type).unwrap_or_default();
            let batch = match reconciler.reconcile_batch(entity_type, &records).await {
                Ok(batch) => batch,
                Err(e) => BatchOutcome::all_failed(
                    entity_type,
                    records.iter().map(|r| r.primary_key.as_ref()),
                    &e.to_string(),
                ),
            };
            summary.merged.add(&batch.counts);
            if let Some(handle) = &handle {
                handle.advance(entity_type.as_str());
            }
        }
        summary.error_count = summary.merged.errors;
        summary.completed = true;

        if summary.error_count == 0 {
            info!(path = %path.display(), "rollback merged snapshot back");
        } else {
            error!(
                path = %path.display(),
                errors = summary.error_count,
                "rollback finished with record errors"
            );
        }
        if let Some(handle) = &handle {
            handle.finish(summary.error_count == 0, "rollback finished");
        }
        summary
    }

    /// Keep the newest `snapshot_retention` snapshot files. Returns how
    /// many were deleted.
    pub fn prune(&self) -> Result<usize, RestoreError> {
        let mut files = snapshot_files(&self.config.snapshot_dir)?;
        if files.len() <= self.config.snapshot_retention {
            return Ok(0);
        }
        // Oldest first by capture time, whatever the operation name.
        files.sort_by(|a, b| (capture_stamp(a), a).cmp(&(capture_stamp(b), b)));
        let excess = files.len() - self.config.snapshot_retention;
        for path in &files[..excess] {
            std::fs::remove_file(path).map_err(|e| RestoreError::io(path, e))?;
        }
        Ok(excess)
    }
}

/// The compact timestamp in `pre_{operation}_{stamp}_{id}.json`.
fn capture_stamp(path: &Path) -> Option<&str> {
    path.file_stem()?.to_str()?.rsplit('_').nth(1)
}

/// Rollback snapshot files in `dir`; a missing directory has none.
pub(crate) fn snapshot_files(dir: &Path) -> Result<Vec<PathBuf>, RestoreError> {
    let listing = match std::fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RestoreError::io(dir, e)),
    };
    let mut files = Vec::new();
    for entry in listing {
        let path = entry.map_err(|e| RestoreError::io(dir, e))?.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".json"));
        if is_snapshot {
            files.push(path);
        }
    }
    Ok(files)
}
