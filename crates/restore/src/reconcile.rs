//! Reconciliation engine.
//!
//! Applies one entity type's snapshot records to the live store, one
//! record at a time, each write in its own atomic unit. A record's failure
//! becomes an `error` (or benign `skipped`) outcome and never touches its
//! siblings.
//!
//! Decision order for a record:
//!
//! 1. a primary-key hit is updated in place, in either mode;
//! 2. replace mode inserts everything else;
//! 3. merge mode tries the schema's unique-key candidates in priority
//!    order: one match applies the duplicate strategy, two or more is a
//!    conflict, none moves on to the next candidate;
//! 4. with no decision the record is inserted.
//!
//! Dry runs take the same decisions against a preview ledger of the rows
//! they would have created, so later records see earlier ones.

use std::collections::{BTreeMap, BTreeSet};

use campus_store::{FieldMap, FieldValue, ModelRegistry, PrimaryKey, Row, SchemaDescriptor, StoreError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::SnapshotRecord;
use crate::coerce::coerce_fields;
use crate::error::RestoreError;
use crate::report::{
    BatchOutcome, ConflictSample, DuplicateStrategy, OutcomeKind, RecordOutcome, RestoreMode,
    MAX_CONFLICT_SAMPLES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub mode: RestoreMode,
    pub duplicate_strategy: DuplicateStrategy,
    /// Decide every outcome but write nothing.
    pub dry_run: bool,
    pub chunk_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            mode: RestoreMode::Merge,
            duplicate_strategy: DuplicateStrategy::Skip,
            dry_run: false,
            chunk_size: 1000,
        }
    }
}

enum Plan {
    Create(Option<PrimaryKey>),
    Update {
        target: PrimaryKey,
        /// Set when the row was found through a unique key.
        matched_on: Option<Vec<String>>,
    },
    Skip {
        target: PrimaryKey,
        matched_on: Vec<String>,
    },
    Conflict {
        key: Vec<String>,
        matches: usize,
        samples: Vec<ConflictSample>,
    },
}

/// Rows a dry run would have written.
#[derive(Debug, Default)]
struct PreviewLedger {
    rows: BTreeMap<String, BTreeMap<PrimaryKey, FieldMap>>,
    /// Entity types a replace preview treats as already empty.
    cleared: BTreeSet<String>,
    generated: u64,
}

impl PreviewLedger {
    fn contains(&self, entity_type: &str, pk: &PrimaryKey) -> bool {
        self.rows
            .get(entity_type)
            .is_some_and(|rows| rows.contains_key(pk))
    }

    fn insert(&mut self, entity_type: &str, pk: Option<PrimaryKey>, fields: FieldMap) {
        let pk = pk.unwrap_or_else(|| {
            self.generated += 1;
            PrimaryKey::Text(format!("preview-{}", self.generated))
        });
        self.rows
            .entry(entity_type.to_string())
            .or_default()
            .insert(pk, fields);
    }

    fn update(&mut self, entity_type: &str, pk: &PrimaryKey, fields: &FieldMap) {
        if let Some(row) = self.rows.get_mut(entity_type).and_then(|r| r.get_mut(pk)) {
            row.extend(fields.clone());
        }
    }

    fn find(&self, entity_type: &str, values: &FieldMap) -> Vec<Row> {
        self.rows
            .get(entity_type)
            .into_iter()
            .flatten()
            .filter(|(_, row)| values.iter().all(|(k, v)| row.get(k) == Some(v)))
            .map(|(pk, fields)| Row {
                pk: pk.clone(),
                fields: fields.clone(),
            })
            .collect()
    }
}

/// Reconciles batches against one registry under fixed options.
///
/// One reconciler serves a whole restore run so a dry run's preview spans
/// entity types (a previewed student can reference a previewed classroom).
pub struct Reconciler<'r, R: ModelRegistry> {
    registry: &'r R,
    options: ReconcileOptions,
    preview: PreviewLedger,
}

impl<'r, R: ModelRegistry> Reconciler<'r, R> {
    pub fn new(registry: &'r R, options: ReconcileOptions) -> Self {
        Reconciler {
            registry,
            options,
            preview: PreviewLedger::default(),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// In a dry run, read `entity_type` as empty from now on.
    pub fn assume_cleared(&mut self, entity_type: &str) {
        self.preview.cleared.insert(entity_type.to_string());
    }

    /// Apply `records` of one entity type.
    ///
    /// Only a failure to resolve the entity type is returned as an error;
    /// everything per-record is an outcome.
    pub async fn reconcile_batch(
        &mut self,
        entity_type: &str,
        records: &[SnapshotRecord],
    ) -> Result<BatchOutcome, RestoreError> {
        let schema = self
            .registry
            .resolve(entity_type)
            .await
            .map_err(|source| RestoreError::EntityResolution {
                entity_type: entity_type.to_string(),
                source,
            })?;

        let mut batch = BatchOutcome::new(entity_type);
        let chunk_size = self.options.chunk_size.max(1);
        for (chunk_no, chunk) in records.chunks(chunk_size).enumerate() {
            debug!(
                entity_type,
                chunk = chunk_no,
                records = chunk.len(),
                "reconciling chunk"
            );
            for (offset, record) in chunk.iter().enumerate() {
                let index = chunk_no * chunk_size + offset;
                let outcome = self.apply(&schema, index, record, &mut batch.warnings).await;
                if outcome.kind == OutcomeKind::Error {
                    warn!(
                        entity_type,
                        index,
                        reason = outcome.reason.as_deref().unwrap_or(""),
                        "record failed"
                    );
                }
                batch.push(outcome);
            }
        }
        Ok(batch)
    }

    async fn apply(
        &mut self,
        schema: &SchemaDescriptor,
        index: usize,
        record: &SnapshotRecord,
        warnings: &mut usize,
    ) -> RecordOutcome {
        let entity_type = schema.entity_type.as_str();
        let coerced = coerce_fields(schema, &record.fields);
        if !coerced.dropped.is_empty() {
            debug!(entity_type, index, dropped = ?coerced.dropped, "ignoring fields unknown to schema");
        }
        for warning in &coerced.warnings {
            warn!(entity_type, index, "{}", warning);
        }
        *warnings += coerced.warnings.len();

        let mut fields = coerced.fields;
        *warnings += self.null_dangling_references(schema, index, &mut fields).await;

        let pk = record.primary_key.clone();
        let plan = match self.plan(schema, pk.as_ref(), &fields).await {
            Ok(plan) => plan,
            Err(e) => {
                return RecordOutcome::new(index, pk, OutcomeKind::Error)
                    .with_reason(format!("lookup failed: {e}"))
            }
        };
        self.execute(schema, index, pk, plan, fields).await
    }

    /// Null out references whose target row does not exist. Returns how
    /// many were nulled.
    async fn null_dangling_references(
        &self,
        schema: &SchemaDescriptor,
        index: usize,
        fields: &mut FieldMap,
    ) -> usize {
        let mut nulled = 0;
        for field in &schema.fields {
            let Some(target) = field.reference_target() else {
                continue;
            };
            let Some(FieldValue::Ref(target_pk)) = fields.get(&field.name) else {
                continue;
            };
            let target_pk = target_pk.clone();
            if let Some(resolved) = self.resolve_reference(target, &target_pk).await {
                if resolved != target_pk {
                    fields.insert(field.name.clone(), FieldValue::Ref(resolved));
                }
            } else {
                warn!(
                    entity_type = %schema.entity_type,
                    index,
                    field = %field.name,
                    target,
                    pk = %target_pk,
                    "dangling reference set to null"
                );
                fields.insert(field.name.clone(), FieldValue::Null);
                nulled += 1;
            }
        }
        nulled
    }

    async fn plan(
        &self,
        schema: &SchemaDescriptor,
        pk: Option<&PrimaryKey>,
        fields: &FieldMap,
    ) -> Result<Plan, StoreError> {
        let entity_type = schema.entity_type.as_str();
        if let Some(pk) = pk {
            if self.exists(entity_type, pk).await? {
                return Ok(Plan::Update {
                    target: pk.clone(),
                    matched_on: None,
                });
            }
        }
        if self.options.mode == RestoreMode::Replace {
            return Ok(Plan::Create(pk.cloned()));
        }

        for key in schema.unique_key_candidates() {
            let Some(values) = key_values(&key, fields) else {
                continue;
            };
            let matches = self.matching(entity_type, &values).await?;
            match matches.as_slice() {
                [] => continue,
                [row] => {
                    let target = row.pk.clone();
                    return Ok(match self.options.duplicate_strategy {
                        DuplicateStrategy::Skip => Plan::Skip {
                            target,
                            matched_on: key,
                        },
                        DuplicateStrategy::Update => Plan::Update {
                            target,
                            matched_on: Some(key),
                        },
                    });
                }
                rows => {
                    let samples = rows
                        .iter()
                        .take(MAX_CONFLICT_SAMPLES)
                        .map(|row| ConflictSample {
                            pk: row.pk.clone(),
                            values: key
                                .iter()
                                .map(|f| {
                                    let v = row.get(f).map(FieldValue::to_json).unwrap_or(Value::Null);
                                    (f.clone(), v)
                                })
                                .collect(),
                        })
                        .collect();
                    return Ok(Plan::Conflict {
                        matches: rows.len(),
                        key,
                        samples,
                    });
                }
            }
        }
        Ok(Plan::Create(pk.cloned()))
    }

    async fn execute(
        &mut self,
        schema: &SchemaDescriptor,
        index: usize,
        pk: Option<PrimaryKey>,
        plan: Plan,
        fields: FieldMap,
    ) -> RecordOutcome {
        let entity_type = schema.entity_type.as_str();
        let dry_run = self.options.dry_run;
        match plan {
            Plan::Create(key) => {
                if dry_run {
                    if let Some(clash) = self.preview_clash(schema, key.as_ref(), &fields).await {
                        return RecordOutcome::new(index, key, OutcomeKind::Skipped)
                            .with_reason(format!("already exists: {clash}"));
                    }
                    self.preview.insert(entity_type, key.clone(), fields);
                    return RecordOutcome::new(index, key, OutcomeKind::Created);
                }
                match self.create(entity_type, key.clone(), fields).await {
                    Ok(created) => RecordOutcome::new(index, Some(created), OutcomeKind::Created),
                    Err(e) => write_failed(index, key, e),
                }
            }
            Plan::Update { target, matched_on } => {
                let (fields, outcome) = match matched_on {
                    None => (
                        fields,
                        RecordOutcome::new(index, pk.clone(), OutcomeKind::Updated),
                    ),
                    Some(key) => (
                        fields.into_iter().filter(|(_, v)| !v.is_null()).collect(),
                        RecordOutcome::new(index, pk.clone(), OutcomeKind::Updated).with_reason(
                            format!("merged into row {} on ({})", target, key.join(", ")),
                        ),
                    ),
                };
                if dry_run {
                    self.preview.update(entity_type, &target, &fields);
                    return outcome;
                }
                match self.update(entity_type, &target, fields).await {
                    Ok(()) => outcome,
                    Err(e) => write_failed(index, pk, e),
                }
            }
            Plan::Skip { target, matched_on } => RecordOutcome::new(index, pk, OutcomeKind::Skipped)
                .with_reason(format!(
                    "matches row {} on ({})",
                    target,
                    matched_on.join(", ")
                )),
            Plan::Conflict {
                key,
                matches,
                samples,
            } => {
                warn!(entity_type, index, matches, key = ?key, "unique key conflict");
                let mut outcome = RecordOutcome::new(index, pk, OutcomeKind::Conflict).with_reason(
                    format!("{} live rows match ({})", matches, key.join(", ")),
                );
                outcome.samples = samples;
                outcome
            }
        }
    }

    /// The key of the row `pk` points at. A key written with the other
    /// JSON type (`"5"` for an int-keyed row, or the reverse) still
    /// resolves, to the row's own key.
    async fn resolve_reference(&self, target: &str, pk: &PrimaryKey) -> Option<PrimaryKey> {
        let alternate = match pk {
            PrimaryKey::Int(n) => Some(PrimaryKey::Text(n.to_string())),
            PrimaryKey::Text(s) => s.trim().parse().ok().map(PrimaryKey::Int),
        };
        for candidate in std::iter::once(pk.clone()).chain(alternate) {
            match self.exists(target, &candidate).await {
                Ok(true) => return Some(candidate),
                Ok(false) => {}
                Err(e) => {
                    debug!(target, error = %e, "reference target lookup failed");
                    return None;
                }
            }
        }
        None
    }

    /// What a previewed insert would collide with, mirroring the store's
    /// duplicate checks.
    async fn preview_clash(
        &self,
        schema: &SchemaDescriptor,
        pk: Option<&PrimaryKey>,
        fields: &FieldMap,
    ) -> Option<String> {
        let entity_type = schema.entity_type.as_str();
        if let Some(pk) = pk {
            if self.exists(entity_type, pk).await.unwrap_or(false) {
                return Some(format!("{entity_type} {pk}"));
            }
        }
        for key in schema.unique_key_candidates() {
            let Some(values) = key_values(&key, fields) else {
                continue;
            };
            let taken = self
                .matching(entity_type, &values)
                .await
                .is_ok_and(|rows| !rows.is_empty());
            if taken {
                return Some(format!("{entity_type} ({})", key.join(", ")));
            }
        }
        None
    }

    // ── Store access ─────────────────────────────────────────────────────────

    async fn exists(&self, entity_type: &str, pk: &PrimaryKey) -> Result<bool, StoreError> {
        if self.options.dry_run {
            if self.preview.contains(entity_type, pk) {
                return Ok(true);
            }
            if self.preview.cleared.contains(entity_type) {
                return Ok(false);
            }
        }
        Ok(self.registry.get(entity_type, pk).await?.is_some())
    }

    async fn matching(&self, entity_type: &str, values: &FieldMap) -> Result<Vec<Row>, StoreError> {
        if !self.options.dry_run {
            return self.registry.find_by(entity_type, values).await;
        }
        let mut rows = if self.preview.cleared.contains(entity_type) {
            Vec::new()
        } else {
            self.registry.find_by(entity_type, values).await?
        };
        rows.extend(self.preview.find(entity_type, values));
        Ok(rows)
    }

    async fn create(
        &self,
        entity_type: &str,
        pk: Option<PrimaryKey>,
        fields: FieldMap,
    ) -> Result<PrimaryKey, StoreError> {
        let mut txn = self.registry.begin().await?;
        match self.registry.create(&mut txn, entity_type, pk, fields).await {
            Ok(row) => {
                self.registry.commit(txn).await?;
                Ok(row.pk)
            }
            Err(e) => {
                self.discard(txn).await;
                Err(e)
            }
        }
    }

    async fn update(
        &self,
        entity_type: &str,
        pk: &PrimaryKey,
        fields: FieldMap,
    ) -> Result<(), StoreError> {
        let mut txn = self.registry.begin().await?;
        match self.registry.update(&mut txn, entity_type, pk, fields).await {
            Ok(()) => self.registry.commit(txn).await,
            Err(e) => {
                self.discard(txn).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, txn: R::Txn) {
        if let Err(e) = self.registry.rollback(txn).await {
            warn!(error = %e, "rolling back record unit failed");
        }
    }
}

/// The key's values from `fields`, or `None` if any is missing or null.
fn key_values(key: &[String], fields: &FieldMap) -> Option<FieldMap> {
    key.iter()
        .map(|name| {
            fields
                .get(name)
                .filter(|v| !v.is_null())
                .map(|v| (name.clone(), v.clone()))
        })
        .collect()
}

/// "Already exists" rejections are benign duplicates; the rest are errors.
fn write_failed(index: usize, pk: Option<PrimaryKey>, err: StoreError) -> RecordOutcome {
    if err.is_duplicate() {
        RecordOutcome::new(index, pk, OutcomeKind::Skipped).with_reason(format!("already exists: {err}"))
    } else {
        RecordOutcome::new(index, pk, OutcomeKind::Error).with_reason(err.to_string())
    }
}
