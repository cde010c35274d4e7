//! Backup export and retention cleanup.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use campus_store::ModelRegistry;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::clock;
use crate::codec::{self, SnapshotRecord};
use crate::error::RestoreError;
use crate::job::{new_job_id, BackupJob, JobRecord, JobStore};
use crate::orchestrator::{sha256_hex, Orchestrator};
use crate::progress::{OperationType, ProgressHandle};
use crate::rollback::snapshot_files;

/// What a backup contains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupReport {
    pub apps: Vec<String>,
    /// Exported rows per entity type.
    pub entity_types: BTreeMap<String, usize>,
    pub total_records: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub files_removed: usize,
    pub records_removed: usize,
}

/// Every row of `entity_types`, in the order given.
pub async fn export<R: ModelRegistry>(
    registry: &R,
    entity_types: &[String],
) -> Result<Vec<SnapshotRecord>, RestoreError> {
    let mut records = Vec::new();
    for entity_type in entity_types {
        let rows = registry
            .list(entity_type)
            .await
            .map_err(|source| RestoreError::EntityResolution {
                entity_type: entity_type.clone(),
                source,
            })?;
        records.extend(rows.iter().map(|row| SnapshotRecord::from_row(entity_type, row)));
    }
    Ok(records)
}

struct Written {
    checksum: String,
    byte_size: u64,
    report: BackupReport,
}

impl<R: ModelRegistry, J: JobStore> Orchestrator<R, J> {
    /// Export entity types to `destination` and record a backup job.
    ///
    /// With no explicit list every allow-listed registry type is exported.
    /// Requested types outside the allow-list are left out with a warning.
    /// Like `restore`, only job store failures are returned as `Err`.
    pub async fn create_backup(
        &self,
        entity_types: Option<Vec<String>>,
        destination: &Path,
    ) -> Result<BackupJob, RestoreError> {
        let started = Instant::now();
        let requested: Vec<String> = match entity_types {
            Some(types) => types.iter().map(|t| t.to_lowercase()).collect(),
            None => self
                .registry
                .entity_types()
                .await?
                .into_iter()
                .filter(|t| self.config.is_allowed(t))
                .collect(),
        };
        let (allowed, rejected): (Vec<String>, Vec<String>) = requested
            .iter()
            .cloned()
            .partition(|t| self.config.is_allowed(t));
        for entity_type in &rejected {
            warn!(entity_type = %entity_type, "entity type not allow-listed; left out of backup");
        }
        let ordered = self.orderer.order(&allowed);

        let mut job = BackupJob::new(requested);
        job.start()?;
        self.jobs.save(&JobRecord::Backup(job.clone()))?;
        info!(job_id = %job.id, entity_types = ordered.len(), "backup started");
        let handle = self
            .progress
            .start(&job.id, OperationType::Backup, ordered.len() as u64 + 1);

        match self.write_backup(&ordered, destination, &handle).await {
            Ok(written) => {
                job.file_reference = Some(destination.display().to_string());
                job.checksum = Some(written.checksum);
                job.byte_size = Some(written.byte_size);
                job.report = Some(written.report);
                job.succeed()?;
                handle.finish(true, "backup written");
                info!(
                    job_id = %job.id,
                    path = %destination.display(),
                    bytes = written.byte_size,
                    "backup finished"
                );
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "backup failed");
                job.fail(e.to_string())?;
                handle.finish(false, e.to_string());
            }
        }
        job.duration_ms = Some(started.elapsed().as_millis() as u64);
        self.jobs.save(&JobRecord::Backup(job.clone()))?;
        Ok(job)
    }

    async fn write_backup(
        &self,
        ordered: &[String],
        destination: &Path,
        progress: &ProgressHandle,
    ) -> Result<Written, RestoreError> {
        let mut records = Vec::new();
        let mut report = BackupReport::default();
        for entity_type in ordered {
            let exported = export(&self.registry, std::slice::from_ref(entity_type)).await?;
            report.entity_types.insert(entity_type.clone(), exported.len());
            records.extend(exported);
            progress.advance(entity_type.as_str());
        }
        report.total_records = records.len();
        report.apps = ordered
            .iter()
            .filter_map(|t| t.split_once('.').map(|(app, _)| app.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let bytes = codec::encode(&records)?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RestoreError::io(parent, e))?;
        }
        std::fs::write(destination, &bytes).map_err(|e| RestoreError::io(destination, e))?;
        Ok(Written {
            checksum: sha256_hex(&bytes),
            byte_size: bytes.len() as u64,
            report,
        })
    }

    /// Drop job records older than `older_than_days`, the backup files
    /// they point at, and rollback snapshots older than the same cutoff.
    pub async fn cleanup(&self, older_than_days: u32) -> Result<CleanupSummary, RestoreError> {
        let Some(cutoff) = clock::now().checked_sub(Duration::days(i64::from(older_than_days)))
        else {
            info!(older_than_days, "cutoff predates the supported calendar; nothing to clean");
            return Ok(CleanupSummary::default());
        };
        let handle = self.progress.start(&new_job_id(), OperationType::Cleanup, 2);
        let mut summary = CleanupSummary::default();

        let removed = self.jobs.prune(cutoff)?;
        summary.records_removed = removed.len();
        for job in &removed {
            let JobRecord::Backup(backup) = job else {
                continue;
            };
            let Some(file) = &backup.file_reference else {
                continue;
            };
            match std::fs::remove_file(file) {
                Ok(()) => summary.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file, error = %e, "could not delete backup file"),
            }
        }
        handle.advance("job records pruned");

        for path in snapshot_files(&self.config.snapshot_dir)? {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified());
            match modified {
                Ok(at) if OffsetDateTime::from(at) < cutoff => match std::fs::remove_file(&path) {
                    Ok(()) => summary.files_removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "could not delete snapshot"),
                },
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "cannot read snapshot age"),
            }
        }
        handle.finish(true, "cleanup finished");
        info!(
            files_removed = summary.files_removed,
            records_removed = summary.records_removed,
            "cleanup finished"
        );
        Ok(summary)
    }
}
