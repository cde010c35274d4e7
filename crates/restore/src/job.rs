//! Durable job records and the stores that keep them.
//!
//! A job moves `pending -> running -> success | failed` and never leaves a
//! terminal state. Records are written once per transition so an
//! interrupted operation still leaves a `running` record behind.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::backup::BackupReport;
use crate::clock;
use crate::report::{DuplicateStrategy, RestoreMode, RestoreReport};
use crate::rollback::RollbackSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

fn transition(id: &str, status: &mut JobStatus, next: JobStatus) -> Result<(), JobError> {
    if !status.can_transition_to(next) {
        return Err(JobError::IllegalTransition {
            id: id.to_string(),
            from: *status,
            to: next,
        });
    }
    *status = next;
    Ok(())
}

pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Where a restore's snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A snapshot file supplied by the caller.
    File { path: String },
    /// The file written by an earlier backup job.
    Backup { job_id: String },
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::File { path } => write!(f, "file {}", path),
            SourceDescriptor::Backup { job_id } => write!(f, "backup {}", job_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: String,
    pub status: JobStatus,
    pub source: SourceDescriptor,
    pub mode: RestoreMode,
    pub duplicate_strategy: DuplicateStrategy,
    #[serde(default)]
    pub dry_run: bool,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string. None until the job is terminal.
    pub completed_at: Option<String>,
    pub report: Option<RestoreReport>,
    /// Present only when `status` is `failed`.
    pub error_detail: Option<String>,
    /// Present when a failed job tried to merge its pre-restore snapshot back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSummary>,
}

impl RestoreJob {
    pub fn new(
        source: SourceDescriptor,
        mode: RestoreMode,
        duplicate_strategy: DuplicateStrategy,
        dry_run: bool,
    ) -> Self {
        RestoreJob {
            id: new_job_id(),
            status: JobStatus::Pending,
            source,
            mode,
            duplicate_strategy,
            dry_run,
            created_at: clock::rfc3339(clock::now()),
            completed_at: None,
            report: None,
            error_detail: None,
            rollback: None,
        }
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Running)
    }

    pub fn succeed(&mut self, report: RestoreReport) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Success)?;
        self.report = Some(report);
        self.completed_at = Some(clock::rfc3339(clock::now()));
        Ok(())
    }

    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Failed)?;
        self.error_detail = Some(detail.into());
        self.completed_at = Some(clock::rfc3339(clock::now()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub status: JobStatus,
    /// Path of the written snapshot file.
    pub file_reference: Option<String>,
    /// Hex SHA-256 of the file contents.
    pub checksum: Option<String>,
    pub byte_size: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Entity types requested for export.
    pub entity_types: Vec<String>,
    pub report: Option<BackupReport>,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error_detail: Option<String>,
}

impl BackupJob {
    pub fn new(entity_types: Vec<String>) -> Self {
        BackupJob {
            id: new_job_id(),
            status: JobStatus::Pending,
            file_reference: None,
            checksum: None,
            byte_size: None,
            duration_ms: None,
            entity_types,
            report: None,
            created_at: clock::rfc3339(clock::now()),
            completed_at: None,
            error_detail: None,
        }
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Running)
    }

    pub fn succeed(&mut self) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Success)?;
        self.completed_at = Some(clock::rfc3339(clock::now()));
        Ok(())
    }

    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), JobError> {
        transition(&self.id, &mut self.status, JobStatus::Failed)?;
        self.error_detail = Some(detail.into());
        self.completed_at = Some(clock::rfc3339(clock::now()));
        Ok(())
    }
}

/// Any persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRecord {
    Restore(RestoreJob),
    Backup(BackupJob),
}

impl JobRecord {
    pub fn id(&self) -> &str {
        match self {
            JobRecord::Restore(job) => &job.id,
            JobRecord::Backup(job) => &job.id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobRecord::Restore(job) => job.status,
            JobRecord::Backup(job) => job.status,
        }
    }

    pub fn created_at(&self) -> &str {
        match self {
            JobRecord::Restore(job) => &job.created_at,
            JobRecord::Backup(job) => &job.created_at,
        }
    }

    /// True if the record was created strictly before `cutoff`. Records
    /// with an unreadable timestamp are never considered old.
    pub fn created_before(&self, cutoff: OffsetDateTime) -> bool {
        clock::parse_rfc3339(self.created_at()).is_some_and(|at| at < cutoff)
    }
}

impl From<RestoreJob> for JobRecord {
    fn from(job: RestoreJob) -> Self {
        JobRecord::Restore(job)
    }
}

impl From<BackupJob> for JobRecord {
    fn from(job: BackupJob) -> Self {
        JobRecord::Backup(job)
    }
}

// ── Job stores ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job record {path} is not valid: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence for job records (the audit trail).
///
/// `list` returns records oldest first. `prune` removes and returns every
/// record created before the cutoff.
pub trait JobStore: Send + Sync {
    fn save(&self, job: &JobRecord) -> Result<(), JobStoreError>;

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError>;

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError>;

    fn prune(&self, before: OffsetDateTime) -> Result<Vec<JobRecord>, JobStoreError>;
}

fn sort_by_creation(jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| {
        a.created_at()
            .cmp(b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.id().to_string(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<JobRecord> = jobs.values().cloned().collect();
        sort_by_creation(&mut all);
        Ok(all)
    }

    fn prune(&self, before: OffsetDateTime) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let old: Vec<String> = jobs
            .values()
            .filter(|job| job.created_before(before))
            .map(|job| job.id().to_string())
            .collect();
        let mut removed: Vec<JobRecord> = old.iter().filter_map(|id| jobs.remove(id)).collect();
        sort_by_creation(&mut removed);
        Ok(removed)
    }
}

/// One pretty-printed `<id>.json` file per job in a directory.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileJobStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        safe.then(|| self.dir.join(format!("{}.json", id)))
    }

    fn read(path: &Path) -> Result<JobRecord, JobStoreError> {
        let bytes = std::fs::read(path).map_err(|source| JobStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| JobStoreError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every `(path, record)` in the directory. Unreadable files are
    /// skipped with a warning so one bad record cannot hide the rest.
    fn entries(&self) -> Result<Vec<(PathBuf, JobRecord)>, JobStoreError> {
        let listing = match std::fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JobStoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut entries = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|source| JobStoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(job) => entries.push((path, job)),
                Err(e) => warn!(error = %e, "skipping unreadable job record"),
            }
        }
        Ok(entries)
    }
}

impl JobStore for FileJobStore {
    fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| JobStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(job.id()).ok_or_else(|| JobStoreError::Io {
            path: self.dir.join(job.id()),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid job id"),
        })?;
        let json = serde_json::to_vec_pretty(job).map_err(|source| JobStoreError::Serde {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| JobStoreError::Io { path, source })
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut jobs: Vec<JobRecord> = self.entries()?.into_iter().map(|(_, job)| job).collect();
        sort_by_creation(&mut jobs);
        Ok(jobs)
    }

    fn prune(&self, before: OffsetDateTime) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut removed = Vec::new();
        for (path, job) in self.entries()? {
            if !job.created_before(before) {
                continue;
            }
            std::fs::remove_file(&path).map_err(|source| JobStoreError::Io {
                path: path.clone(),
                source,
            })?;
            removed.push(job);
        }
        sort_by_creation(&mut removed);
        Ok(removed)
    }
}
