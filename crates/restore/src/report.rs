//! Restore outcomes and the job report built from them.

use std::collections::BTreeMap;
use std::fmt;

use campus_store::PrimaryKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock;

/// Conflict samples kept per record.
pub const MAX_CONFLICT_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Update rows that exist, insert the rest; never delete.
    #[default]
    Merge,
    /// Clear the affected entity types first, then load.
    Replace,
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreMode::Merge => write!(f, "merge"),
            RestoreMode::Replace => write!(f, "replace"),
        }
    }
}

/// What merge does when a unique key matches a row under a different
/// primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStrategy {
    #[default]
    Skip,
    Update,
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateStrategy::Skip => write!(f, "skip"),
            DuplicateStrategy::Update => write!(f, "update"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Created,
    Updated,
    Skipped,
    Conflict,
    Error,
}

/// One live row matching a conflicting unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSample {
    pub pk: PrimaryKey,
    /// The unique-key fields of that row.
    pub values: Map<String, Value>,
}

/// Result of applying one snapshot record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Position of the record within its entity type's batch.
    pub index: usize,
    pub pk: Option<PrimaryKey>,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<ConflictSample>,
}

impl RecordOutcome {
    pub fn new(index: usize, pk: Option<PrimaryKey>, kind: OutcomeKind) -> Self {
        RecordOutcome {
            index,
            pk,
            kind,
            reason: None,
            samples: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Created => self.inserted += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Conflict => self.conflicts += 1,
            OutcomeKind::Error => self.errors += 1,
        }
    }

    pub fn add(&mut self, other: &OutcomeCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
    }

    /// Records accounted for, whatever their outcome.
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.skipped + self.conflicts + self.errors
    }
}

/// Outcomes of one entity type's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub entity_type: String,
    pub outcomes: Vec<RecordOutcome>,
    pub counts: OutcomeCounts,
    /// Coercion warnings and nulled dangling references.
    pub warnings: usize,
}

impl BatchOutcome {
    pub fn new(entity_type: &str) -> Self {
        BatchOutcome {
            entity_type: entity_type.to_string(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, outcome: RecordOutcome) {
        self.counts.record(outcome.kind);
        self.outcomes.push(outcome);
    }

    /// Every record becomes an error carrying the same reason.
    pub fn all_failed<'a>(
        entity_type: &str,
        pks: impl IntoIterator<Item = Option<&'a PrimaryKey>>,
        reason: &str,
    ) -> Self {
        let mut batch = BatchOutcome::new(entity_type);
        for (index, pk) in pks.into_iter().enumerate() {
            batch.push(RecordOutcome::new(index, pk.cloned(), OutcomeKind::Error).with_reason(reason));
        }
        batch
    }
}

/// The structured report attached to a finished restore job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub created_at: String,
    pub mode: RestoreMode,
    pub duplicate_strategy: DuplicateStrategy,
    /// Set for dry runs: counts describe what would have happened.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preview: bool,
    pub per_entity_type: BTreeMap<String, OutcomeCounts>,
    pub total: OutcomeCounts,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conflicts: BTreeMap<String, Vec<RecordOutcome>>,
    #[serde(default)]
    pub warnings: usize,
}

impl RestoreReport {
    pub fn new(mode: RestoreMode, duplicate_strategy: DuplicateStrategy, preview: bool) -> Self {
        RestoreReport {
            created_at: clock::human(clock::now()),
            mode,
            duplicate_strategy,
            preview,
            per_entity_type: BTreeMap::new(),
            total: OutcomeCounts::default(),
            conflicts: BTreeMap::new(),
            warnings: 0,
        }
    }

    pub fn absorb(&mut self, batch: &BatchOutcome) {
        self.per_entity_type
            .entry(batch.entity_type.clone())
            .or_default()
            .add(&batch.counts);
        self.total.add(&batch.counts);
        self.warnings += batch.warnings;

        let conflicts: Vec<RecordOutcome> = batch
            .outcomes
            .iter()
            .filter(|o| o.kind == OutcomeKind::Conflict)
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            self.conflicts
                .entry(batch.entity_type.clone())
                .or_default()
                .extend(conflicts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_outcome_kinds() {
        let mut batch = BatchOutcome::new("school.student");
        batch.push(RecordOutcome::new(0, Some(PrimaryKey::Int(1)), OutcomeKind::Created));
        batch.push(RecordOutcome::new(1, Some(PrimaryKey::Int(2)), OutcomeKind::Skipped));
        batch.push(RecordOutcome::new(2, None, OutcomeKind::Conflict));
        assert_eq!(
            batch.counts,
            OutcomeCounts {
                inserted: 1,
                updated: 0,
                skipped: 1,
                conflicts: 1,
                errors: 0,
            }
        );
        assert_eq!(batch.counts.processed(), 3);
    }

    #[test]
    fn report_sums_batches_and_keeps_conflicts() {
        let mut report = RestoreReport::new(RestoreMode::Merge, DuplicateStrategy::Skip, false);
        let mut students = BatchOutcome::new("school.student");
        students.push(RecordOutcome::new(0, None, OutcomeKind::Conflict).with_reason("2 rows"));
        students.warnings = 2;
        let mut fines = BatchOutcome::new("school.fine");
        fines.push(RecordOutcome::new(0, None, OutcomeKind::Updated));

        report.absorb(&students);
        report.absorb(&fines);

        assert_eq!(report.total.conflicts, 1);
        assert_eq!(report.total.updated, 1);
        assert_eq!(report.warnings, 2);
        assert_eq!(report.conflicts["school.student"].len(), 1);
        assert!(!report.conflicts.contains_key("school.fine"));
    }

    #[test]
    fn report_json_shape() {
        let report = RestoreReport::new(RestoreMode::Replace, DuplicateStrategy::Update, false);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "replace");
        assert_eq!(json["duplicate_strategy"], "update");
        assert_eq!(json["total"]["inserted"], 0);
        assert!(json.get("preview").is_none());
        assert!(json.get("conflicts").is_none());
    }

    #[test]
    fn unresolved_batch_is_all_errors() {
        let pks = [Some(PrimaryKey::Int(1)), None];
        let batch = BatchOutcome::all_failed("school.gone", pks.iter().map(Option::as_ref), "unknown");
        assert_eq!(batch.counts.errors, 2);
        assert_eq!(batch.outcomes[1].reason.as_deref(), Some("unknown"));
    }
}
