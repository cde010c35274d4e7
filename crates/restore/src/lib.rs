//! Backup and restore engine for campus data.
//!
//! A restore decodes a JSON snapshot, groups its records by entity type,
//! orders the types parents first and reconciles each batch against a
//! [`campus_store::ModelRegistry`] in merge or replace mode. Destructive
//! phases run under rollback protection; every run leaves a durable job
//! record and an ephemeral progress entry.

pub mod backup;
mod clock;
pub mod codec;
pub mod coerce;
pub mod config;
mod error;
pub mod job;
pub mod orchestrator;
pub mod order;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod rollback;

pub use backup::{export, BackupReport, CleanupSummary};
pub use codec::{decode, encode, looks_like_snapshot, FormatError, Snapshot, SnapshotRecord};
pub use coerce::{coerce, coerce_fields, CoercedRecord, Coercion};
pub use config::{ConfigError, RestoreConfig};
pub use error::RestoreError;
pub use job::{
    BackupJob, FileJobStore, JobError, JobRecord, JobStatus, JobStore, JobStoreError,
    MemoryJobStore, RestoreJob, SourceDescriptor,
};
pub use orchestrator::{Orchestrator, Phase, RestoreRequest, RestoreSource};
pub use order::DependencyOrderer;
pub use progress::{OperationType, ProgressHandle, ProgressState, ProgressStatus, ProgressTracker};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use report::{
    BatchOutcome, ConflictSample, DuplicateStrategy, OutcomeCounts, OutcomeKind, RecordOutcome,
    RestoreMode, RestoreReport,
};
pub use rollback::{OperationFailed, RollbackManager, RollbackSummary};
