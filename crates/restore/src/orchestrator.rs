//! Restore orchestration.
//!
//! ```text
//! Created -> Loading -> Grouping -> (Clearing)? -> Reconciling -> Reporting -> Done
//!                 \          \            \              \
//!                  +----------+------------+--------------+--> Failed
//! ```
//!
//! Loading and Grouping run unprotected: bad input never costs a snapshot.
//! Clearing and Reconciling run under rollback protection when the
//! configuration asks for it. A job is `failed` only when the orchestration
//! itself could not run; per-record errors leave it `success` with non-zero
//! error counts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use campus_store::{ModelRegistry, StoreError};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::codec::{self, FormatError, Snapshot, SnapshotRecord};
use crate::config::RestoreConfig;
use crate::error::RestoreError;
use crate::job::{JobRecord, JobStatus, JobStore, RestoreJob, SourceDescriptor};
use crate::order::DependencyOrderer;
use crate::progress::{OperationType, ProgressHandle, ProgressState, ProgressTracker};
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::report::{BatchOutcome, DuplicateStrategy, RestoreMode, RestoreReport};
use crate::rollback::RollbackManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Loading,
    Grouping,
    Clearing,
    Reconciling,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Loading => "loading",
            Phase::Grouping => "grouping",
            Phase::Clearing => "clearing",
            Phase::Reconciling => "reconciling",
            Phase::Reporting => "reporting",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where to read the snapshot from.
#[derive(Debug, Clone)]
pub enum RestoreSource {
    File(PathBuf),
    /// Snapshot bytes already in memory, e.g. an upload.
    Bytes { name: String, bytes: Vec<u8> },
    /// The file of a successful backup job, checksum-verified.
    Backup(String),
}

impl RestoreSource {
    fn descriptor(&self) -> SourceDescriptor {
        match self {
            RestoreSource::File(path) => SourceDescriptor::File {
                path: path.display().to_string(),
            },
            RestoreSource::Bytes { name, .. } => SourceDescriptor::File { path: name.clone() },
            RestoreSource::Backup(job_id) => SourceDescriptor::Backup {
                job_id: job_id.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub source: RestoreSource,
    pub mode: RestoreMode,
    pub duplicate_strategy: DuplicateStrategy,
    /// Decide and report every outcome without writing.
    pub dry_run: bool,
}

impl RestoreRequest {
    pub fn new(source: RestoreSource) -> Self {
        RestoreRequest {
            source,
            mode: RestoreMode::Merge,
            duplicate_strategy: DuplicateStrategy::Skip,
            dry_run: false,
        }
    }

    pub fn mode(mut self, mode: RestoreMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn duplicate_strategy(mut self, strategy: DuplicateStrategy) -> Self {
        self.duplicate_strategy = strategy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Allow-listed records grouped by entity type, in restore order.
type Groups = Vec<(String, Vec<SnapshotRecord>)>;

/// Drives restores, backups and cleanup against one registry and job store.
pub struct Orchestrator<R: ModelRegistry, J: JobStore> {
    pub(crate) registry: R,
    pub(crate) jobs: J,
    pub(crate) config: RestoreConfig,
    pub(crate) orderer: DependencyOrderer,
    pub(crate) progress: ProgressTracker,
}

impl<R: ModelRegistry, J: JobStore> Orchestrator<R, J> {
    pub fn new(registry: R, jobs: J, config: RestoreConfig) -> Self {
        let orderer = DependencyOrderer::new(config.dependency_order.clone());
        let progress = ProgressTracker::new(Duration::from_secs(config.progress_ttl_secs));
        Orchestrator {
            registry,
            jobs,
            config,
            orderer,
            progress,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    pub fn progress(&self, operation_id: &str, operation_type: OperationType) -> Option<ProgressState> {
        self.progress.query(operation_id, operation_type)
    }

    /// Run one restore to a terminal job.
    ///
    /// Returns `Err` only when the job record itself cannot be kept; every
    /// other failure is reported through a `failed` job.
    pub async fn restore(&self, request: RestoreRequest) -> Result<RestoreJob, RestoreError> {
        let mut job = RestoreJob::new(
            request.source.descriptor(),
            request.mode,
            request.duplicate_strategy,
            request.dry_run,
        );
        self.enter(&job, Phase::Created);
        job.start()?;
        self.jobs.save(&JobRecord::Restore(job.clone()))?;

        self.enter(&job, Phase::Loading);
        let snapshot = match self.load(&request.source) {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail_early(job, e),
        };

        self.enter(&job, Phase::Grouping);
        let groups = self.group(snapshot);
        let replace = request.mode == RestoreMode::Replace;
        let steps = groups.len() as u64 + u64::from(replace);
        let handle = self.progress.start(&job.id, OperationType::Restore, steps);

        let mut report = RestoreReport::new(request.mode, request.duplicate_strategy, request.dry_run);
        let mut reconciler = Reconciler::new(
            &self.registry,
            ReconcileOptions {
                mode: request.mode,
                duplicate_strategy: request.duplicate_strategy,
                dry_run: request.dry_run,
                chunk_size: self.config.chunk_size,
            },
        );

        let work = self.clear_and_reconcile(&job, &groups, &mut reconciler, &mut report, &handle);
        let outcome = if request.dry_run {
            work.await.map_err(|e| (e, None))
        } else {
            RollbackManager::new(&self.registry, &self.config)
                .with_progress(&self.progress)
                .with_rollback_protection("restore", self.config.snapshot_before_restore, work)
                .await
                .map_err(|failed| (failed.error, failed.rollback))
        };

        match outcome {
            Ok(()) => {
                self.enter(&job, Phase::Reporting);
                info!(
                    job_id = %job.id,
                    inserted = report.total.inserted,
                    updated = report.total.updated,
                    skipped = report.total.skipped,
                    conflicts = report.total.conflicts,
                    errors = report.total.errors,
                    preview = report.preview,
                    "restore finished"
                );
                job.succeed(report)?;
                handle.finish(true, "restore finished");
                self.jobs.save(&JobRecord::Restore(job.clone()))?;
                self.enter(&job, Phase::Done);
            }
            Err((e, rollback)) => {
                self.enter(&job, Phase::Failed);
                error!(job_id = %job.id, error = %e, "restore failed");
                job.rollback = rollback;
                job.fail(e.to_string())?;
                handle.finish(false, e.to_string());
                self.jobs.save(&JobRecord::Restore(job.clone()))?;
            }
        }
        Ok(job)
    }

    fn enter(&self, job: &RestoreJob, phase: Phase) {
        info!(job_id = %job.id, phase = %phase, "restore phase");
    }

    fn fail_early(&self, mut job: RestoreJob, e: RestoreError) -> Result<RestoreJob, RestoreError> {
        self.enter(&job, Phase::Failed);
        error!(job_id = %job.id, error = %e, "restore could not load its snapshot");
        job.fail(e.to_string())?;
        let handle = self.progress.start(&job.id, OperationType::Restore, 0);
        handle.finish(false, e.to_string());
        self.jobs.save(&JobRecord::Restore(job.clone()))?;
        Ok(job)
    }

    fn load(&self, source: &RestoreSource) -> Result<Snapshot, RestoreError> {
        let bytes = match source {
            RestoreSource::File(path) => std::fs::read(path).map_err(|e| RestoreError::io(path, e))?,
            RestoreSource::Bytes { bytes, .. } => bytes.clone(),
            RestoreSource::Backup(job_id) => self.read_backup(job_id)?,
        };
        Ok(codec::decode(&bytes)?)
    }

    /// The bytes of a successful backup job's file, checksum-verified.
    fn read_backup(&self, job_id: &str) -> Result<Vec<u8>, RestoreError> {
        let backup = match self.jobs.get(job_id)? {
            Some(JobRecord::Backup(backup)) => backup,
            _ => return Err(RestoreError::BackupNotFound(job_id.to_string())),
        };
        let (Some(file), Some(expected), JobStatus::Success) =
            (&backup.file_reference, &backup.checksum, backup.status)
        else {
            return Err(RestoreError::BackupUnavailable(job_id.to_string()));
        };
        let bytes = std::fs::read(file).map_err(|e| RestoreError::io(file, e))?;
        let actual = sha256_hex(&bytes);
        if &actual != expected {
            return Err(FormatError::ChecksumMismatch {
                file: file.clone(),
                expected: expected.clone(),
                actual,
            }
            .into());
        }
        Ok(bytes)
    }

    /// Bucket records by entity type, drop types outside the allow-list
    /// and order the rest parents first.
    fn group(&self, snapshot: Snapshot) -> Groups {
        let mut buckets: BTreeMap<String, Vec<SnapshotRecord>> = BTreeMap::new();
        let mut seen = Vec::new();
        let mut dropped: BTreeMap<String, usize> = BTreeMap::new();
        for record in snapshot.records {
            if !self.config.is_allowed(&record.entity_type) {
                *dropped.entry(record.entity_type).or_default() += 1;
                continue;
            }
            if !buckets.contains_key(&record.entity_type) {
                seen.push(record.entity_type.clone());
            }
            buckets.entry(record.entity_type.clone()).or_default().push(record);
        }
        for (entity_type, count) in &dropped {
            warn!(entity_type = %entity_type, records = count, "entity type not allow-listed; dropped");
        }
        self.orderer
            .order(&seen)
            .into_iter()
            .map(|t| {
                let records = buckets.remove(&t).unwrap_or_default();
                (t, records)
            })
            .collect()
    }

    async fn clear_and_reconcile(
        &self,
        job: &RestoreJob,
        groups: &Groups,
        reconciler: &mut Reconciler<'_, R>,
        report: &mut RestoreReport,
        progress: &ProgressHandle,
    ) -> Result<(), RestoreError> {
        let types: Vec<&str> = groups.iter().map(|(t, _)| t.as_str()).collect();
        if reconciler.options().mode == RestoreMode::Replace {
            self.enter(job, Phase::Clearing);
            for entity_type in self.orderer.clear_order(&types) {
                if reconciler.options().dry_run {
                    if !self.config.is_protected(&entity_type) {
                        reconciler.assume_cleared(&entity_type);
                    }
                    continue;
                }
                self.clear(&entity_type).await?;
            }
            progress.advance("cleared");
        }

        self.enter(job, Phase::Reconciling);
        for (entity_type, records) in groups {
            let batch = match reconciler.reconcile_batch(entity_type, records).await {
                Ok(batch) => batch,
                Err(e @ RestoreError::EntityResolution { .. }) => {
                    warn!(entity_type = %entity_type, error = %e, "entity type skipped");
                    BatchOutcome::all_failed(
                        entity_type,
                        records.iter().map(|r| r.primary_key.as_ref()),
                        &e.to_string(),
                    )
                }
                Err(e) => return Err(e),
            };
            info!(
                entity_type = %entity_type,
                inserted = batch.counts.inserted,
                updated = batch.counts.updated,
                skipped = batch.counts.skipped,
                conflicts = batch.counts.conflicts,
                errors = batch.counts.errors,
                "entity type reconciled"
            );
            report.absorb(&batch);
            progress.advance(entity_type.as_str());
        }
        Ok(())
    }

    /// Delete every row of one entity type in its own unit. Protected
    /// types are left alone; unknown types are skipped.
    async fn clear(&self, entity_type: &str) -> Result<(), RestoreError> {
        if self.config.is_protected(entity_type) {
            info!(entity_type, "protected entity type not cleared");
            return Ok(());
        }
        let clear_err = |source: StoreError| RestoreError::Clear {
            entity_type: entity_type.to_string(),
            source,
        };
        let mut txn = self.registry.begin().await.map_err(clear_err)?;
        match self
            .registry
            .delete_all(&mut txn, entity_type, &self.config.protected_entity_types)
            .await
        {
            Ok(removed) => {
                self.registry.commit(txn).await.map_err(clear_err)?;
                info!(entity_type, removed, "cleared entity type");
                Ok(())
            }
            Err(StoreError::UnknownEntityType { .. }) => {
                self.discard_clear(entity_type, txn).await;
                warn!(entity_type, "cannot clear unknown entity type; skipped");
                Ok(())
            }
            Err(e) => {
                self.discard_clear(entity_type, txn).await;
                Err(clear_err(e))
            }
        }
    }

    async fn discard_clear(&self, entity_type: &str, txn: R::Txn) {
        if let Err(e) = self.registry.rollback(txn).await {
            warn!(entity_type, error = %e, "rolling back clear failed");
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::MemoryJobStore;
    use std::collections::BTreeSet;

    use campus_store::conformance::{fixture_schemas, CLASSROOM, STUDENT};
    use campus_store::{FieldMap, FieldValue, MemoryStore, PrimaryKey, Row, SchemaDescriptor};

    fn orchestrator() -> Orchestrator<MemoryStore, MemoryJobStore> {
        let config = RestoreConfig {
            snapshot_before_restore: false,
            ..RestoreConfig::default()
        };
        Orchestrator::new(MemoryStore::with_schemas(fixture_schemas()), MemoryJobStore::new(), config)
    }

    fn bytes(json: &str) -> RestoreSource {
        RestoreSource::Bytes {
            name: "upload.json".to_string(),
            bytes: json.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn malformed_input_fails_the_job() {
        let orch = orchestrator();
        let job = orch.restore(RestoreRequest::new(bytes("{}"))).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_detail.unwrap().contains("array"));
        assert!(job.report.is_none());
        let stored = orch.jobs().get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_successful_no_op() {
        let orch = orchestrator();
        let job = orch.restore(RestoreRequest::new(bytes("[]"))).await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.report.unwrap().total.processed(), 0);
    }

    #[tokio::test]
    async fn progress_reaches_completion() {
        let orch = orchestrator();
        let job = orch
            .restore(RestoreRequest::new(bytes(
                r#"[{"model":"school.student","pk":1,"fields":{"name":"A","admission_number":"S1"}}]"#,
            )))
            .await
            .unwrap();
        let progress = orch.progress(&job.id, OperationType::Restore).unwrap();
        assert_eq!(progress.percentage, 100.0);
        assert_eq!(orch.registry().count(STUDENT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_backup_id_fails_the_job() {
        let orch = orchestrator();
        let job = orch
            .restore(RestoreRequest::new(RestoreSource::Backup("nope".to_string())))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.source, SourceDescriptor::Backup { job_id: "nope".to_string() });
    }

    // ── Clearing ─────────────────────────────────────────────────────────────

    /// Delegates to a `MemoryStore` but refuses every rollback.
    struct StuckRollback(MemoryStore);

    #[async_trait::async_trait]
    impl ModelRegistry for StuckRollback {
        type Txn = campus_store::MemoryTxn;

        async fn begin(&self) -> Result<Self::Txn, StoreError> {
            self.0.begin().await
        }

        async fn commit(&self, txn: Self::Txn) -> Result<(), StoreError> {
            self.0.commit(txn).await
        }

        async fn rollback(&self, _txn: Self::Txn) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection lost".to_string()))
        }

        async fn entity_types(&self) -> Result<Vec<String>, StoreError> {
            self.0.entity_types().await
        }

        async fn resolve(&self, entity_type: &str) -> Result<SchemaDescriptor, StoreError> {
            self.0.resolve(entity_type).await
        }

        async fn get(&self, entity_type: &str, pk: &PrimaryKey) -> Result<Option<Row>, StoreError> {
            self.0.get(entity_type, pk).await
        }

        async fn find_by(&self, entity_type: &str, values: &FieldMap) -> Result<Vec<Row>, StoreError> {
            self.0.find_by(entity_type, values).await
        }

        async fn count(&self, entity_type: &str) -> Result<usize, StoreError> {
            self.0.count(entity_type).await
        }

        async fn list(&self, entity_type: &str) -> Result<Vec<Row>, StoreError> {
            self.0.list(entity_type).await
        }

        async fn create(
            &self,
            txn: &mut Self::Txn,
            entity_type: &str,
            pk: Option<PrimaryKey>,
            fields: FieldMap,
        ) -> Result<Row, StoreError> {
            self.0.create(txn, entity_type, pk, fields).await
        }

        async fn update(
            &self,
            txn: &mut Self::Txn,
            entity_type: &str,
            pk: &PrimaryKey,
            fields: FieldMap,
        ) -> Result<(), StoreError> {
            self.0.update(txn, entity_type, pk, fields).await
        }

        async fn delete_all(
            &self,
            txn: &mut Self::Txn,
            entity_type: &str,
            protected: &BTreeSet<String>,
        ) -> Result<usize, StoreError> {
            self.0.delete_all(txn, entity_type, protected).await
        }
    }

    fn stuck_orchestrator() -> Orchestrator<StuckRollback, MemoryJobStore> {
        let config = RestoreConfig {
            snapshot_before_restore: false,
            ..RestoreConfig::default()
        };
        let store = MemoryStore::with_schemas(fixture_schemas());
        Orchestrator::new(StuckRollback(store), MemoryJobStore::new(), config)
    }

    #[tokio::test]
    async fn unknown_type_is_skipped_even_when_rollback_fails() {
        let orch = stuck_orchestrator();
        assert!(orch.clear("school.timetable").await.is_ok());
    }

    #[tokio::test]
    async fn blocked_clear_reports_the_delete_error_when_rollback_fails() {
        let orch = stuck_orchestrator();
        let store = &orch.registry().0;
        store
            .seed(
                CLASSROOM,
                PrimaryKey::Int(1),
                FieldMap::from([("name".to_string(), FieldValue::Text("IV-A".to_string()))]),
            )
            .unwrap();
        store
            .seed(
                STUDENT,
                PrimaryKey::Int(1),
                FieldMap::from([
                    ("name".to_string(), FieldValue::Text("Asha".to_string())),
                    ("admission_number".to_string(), FieldValue::Text("S1".to_string())),
                    ("classroom".to_string(), FieldValue::Ref(PrimaryKey::Int(1))),
                ]),
            )
            .unwrap();

        let err = orch.clear(CLASSROOM).await.unwrap_err();
        match err {
            RestoreError::Clear { entity_type, source } => {
                assert_eq!(entity_type, CLASSROOM);
                assert!(matches!(source, StoreError::ForeignKeyViolation { .. }));
            }
            other => panic!("expected a clear error, got {other}"),
        }
        assert_eq!(orch.registry().count(CLASSROOM).await.unwrap(), 1);
    }

    #[test]
    fn checksum_is_lower_hex_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
