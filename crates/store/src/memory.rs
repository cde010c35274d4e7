//! In-memory `ModelRegistry` backend.
//!
//! Used as the reference implementation for the conformance suite, by the
//! CLI (which loads a JSON store file into it) and by restore tests.
//!
//! Writes apply eagerly; each unit keeps an undo log that is replayed on
//! rollback or when the unit is dropped without commit. Readers outside a
//! unit can therefore observe uncommitted rows; restore is sequential, so
//! this backend does not provide isolation between concurrent units.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{FieldMap, FieldValue, PrimaryKey, Row};
use crate::schema::SchemaDescriptor;
use crate::traits::ModelRegistry;

type Table = BTreeMap<PrimaryKey, FieldMap>;

#[derive(Default)]
struct Inner {
    schemas: Vec<SchemaDescriptor>,
    tables: BTreeMap<String, Table>,
}

impl Inner {
    fn schema(&self, entity_type: &str) -> Result<&SchemaDescriptor, StoreError> {
        self.schemas
            .iter()
            .find(|s| s.entity_type == entity_type)
            .ok_or_else(|| unknown(entity_type))
    }

    fn table(&self, entity_type: &str) -> Result<&Table, StoreError> {
        self.tables.get(entity_type).ok_or_else(|| unknown(entity_type))
    }

    fn table_mut(&mut self, entity_type: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(entity_type)
            .ok_or_else(|| unknown(entity_type))
    }

    fn next_key(&self, entity_type: &str) -> Result<PrimaryKey, StoreError> {
        let max = self
            .table(entity_type)?
            .keys()
            .filter_map(|k| match k {
                PrimaryKey::Int(n) => Some(*n),
                PrimaryKey::Text(_) => None,
            })
            .max()
            .unwrap_or(0);
        max.checked_add(1).map(PrimaryKey::Int).ok_or_else(|| {
            StoreError::Backend(format!("{}: integer key space exhausted", entity_type))
        })
    }

    /// Check NOT NULL, reference existence and unique constraints for a
    /// full row about to be written under `pk`.
    fn validate(
        &self,
        schema: &SchemaDescriptor,
        pk: &PrimaryKey,
        fields: &FieldMap,
    ) -> Result<(), StoreError> {
        let entity_type = &schema.entity_type;
        for name in fields.keys() {
            if schema.field(name).is_none() {
                return Err(StoreError::Backend(format!(
                    "unknown field {}.{}",
                    entity_type, name
                )));
            }
        }

        for field in &schema.fields {
            let value = fields.get(&field.name).unwrap_or(&FieldValue::Null);
            if value.is_null() {
                if !field.nullable {
                    return Err(StoreError::NotNullViolation {
                        entity_type: entity_type.clone(),
                        field: field.name.clone(),
                    });
                }
                continue;
            }
            if let Some(target) = field.reference_target() {
                let exists = match value {
                    FieldValue::Ref(target_pk) => self
                        .tables
                        .get(target)
                        .is_some_and(|t| t.contains_key(target_pk)),
                    _ => false,
                };
                if !exists {
                    return Err(StoreError::ForeignKeyViolation {
                        entity_type: entity_type.clone(),
                        field: field.name.clone(),
                        detail: format!("no {} row matches {:?}", target, value),
                    });
                }
            }
        }

        let table = self.table(entity_type)?;
        for key in schema.unique_key_candidates() {
            let wanted: Vec<&FieldValue> = key
                .iter()
                .map(|f| fields.get(f).unwrap_or(&FieldValue::Null))
                .collect();
            if wanted.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = table.iter().any(|(other_pk, other)| {
                other_pk != pk
                    && key
                        .iter()
                        .zip(&wanted)
                        .all(|(f, v)| other.get(f) == Some(*v))
            });
            if clash {
                return Err(StoreError::UniqueViolation {
                    entity_type: entity_type.clone(),
                    fields: key,
                });
            }
        }
        Ok(())
    }

    /// Rows of other entity types that still reference `pks` of `entity_type`.
    fn referencing(&self, entity_type: &str, pks: &BTreeSet<&PrimaryKey>) -> Option<StoreError> {
        for schema in &self.schemas {
            if schema.entity_type == entity_type {
                continue;
            }
            for field in &schema.fields {
                if field.reference_target() != Some(entity_type) {
                    continue;
                }
                let Some(table) = self.tables.get(&schema.entity_type) else {
                    continue;
                };
                let hit = table.iter().find(|(_, row)| match row.get(&field.name) {
                    Some(FieldValue::Ref(target)) => pks.contains(target),
                    _ => false,
                });
                if let Some((pk, _)) = hit {
                    return Some(StoreError::ForeignKeyViolation {
                        entity_type: schema.entity_type.clone(),
                        field: field.name.clone(),
                        detail: format!(
                            "row {} still references {}",
                            pk, entity_type
                        ),
                    });
                }
            }
        }
        None
    }
}

fn unknown(entity_type: &str) -> StoreError {
    StoreError::UnknownEntityType {
        entity_type: entity_type.to_string(),
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Undo {
    Created {
        entity_type: String,
        pk: PrimaryKey,
    },
    Updated {
        entity_type: String,
        pk: PrimaryKey,
        previous: FieldMap,
    },
    Deleted {
        entity_type: String,
        rows: Table,
    },
}

/// Atomic unit for [`MemoryStore`].
pub struct MemoryTxn {
    inner: Arc<Mutex<Inner>>,
    undo: Vec<Undo>,
    open: bool,
}

impl MemoryTxn {
    fn undo_all(&mut self) {
        let mut inner = lock(&self.inner);
        for step in self.undo.drain(..).rev() {
            match step {
                Undo::Created { entity_type, pk } => {
                    if let Some(table) = inner.tables.get_mut(&entity_type) {
                        table.remove(&pk);
                    }
                }
                Undo::Updated {
                    entity_type,
                    pk,
                    previous,
                } => {
                    if let Some(table) = inner.tables.get_mut(&entity_type) {
                        table.insert(pk, previous);
                    }
                }
                Undo::Deleted { entity_type, rows } => {
                    if let Some(table) = inner.tables.get_mut(&entity_type) {
                        table.extend(rows);
                    }
                }
            }
        }
        self.open = false;
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if self.open {
            self.undo_all();
        }
    }
}

/// Thread-safe in-memory registry. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schemas(schemas: Vec<SchemaDescriptor>) -> Self {
        let store = Self::new();
        for schema in schemas {
            store.register(schema);
        }
        store
    }

    /// Register (or replace) an entity type's schema. Existing rows of a
    /// replaced schema are kept.
    pub fn register(&self, schema: SchemaDescriptor) {
        let mut inner = lock(&self.inner);
        inner.tables.entry(schema.entity_type.clone()).or_default();
        match inner
            .schemas
            .iter_mut()
            .find(|s| s.entity_type == schema.entity_type)
        {
            Some(existing) => *existing = schema,
            None => inner.schemas.push(schema),
        }
    }

    /// Insert a row without any constraint checks.
    ///
    /// Meant for fixtures and for loading legacy data that may already
    /// violate constraints (e.g. duplicate natural keys).
    pub fn seed(
        &self,
        entity_type: &str,
        pk: PrimaryKey,
        fields: FieldMap,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        inner.table_mut(entity_type)?.insert(pk, fields);
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for MemoryStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, StoreError> {
        Ok(MemoryTxn {
            inner: Arc::clone(&self.inner),
            undo: Vec::new(),
            open: true,
        })
    }

    async fn commit(&self, mut txn: MemoryTxn) -> Result<(), StoreError> {
        txn.undo.clear();
        txn.open = false;
        Ok(())
    }

    async fn rollback(&self, mut txn: MemoryTxn) -> Result<(), StoreError> {
        txn.undo_all();
        Ok(())
    }

    async fn entity_types(&self) -> Result<Vec<String>, StoreError> {
        let inner = lock(&self.inner);
        Ok(inner.schemas.iter().map(|s| s.entity_type.clone()).collect())
    }

    async fn resolve(&self, entity_type: &str) -> Result<SchemaDescriptor, StoreError> {
        lock(&self.inner).schema(entity_type).cloned()
    }

    async fn get(&self, entity_type: &str, pk: &PrimaryKey) -> Result<Option<Row>, StoreError> {
        let inner = lock(&self.inner);
        Ok(inner.table(entity_type)?.get(pk).map(|fields| Row {
            pk: pk.clone(),
            fields: fields.clone(),
        }))
    }

    async fn find_by(&self, entity_type: &str, values: &FieldMap) -> Result<Vec<Row>, StoreError> {
        let inner = lock(&self.inner);
        Ok(inner
            .table(entity_type)?
            .iter()
            .filter(|(_, row)| values.iter().all(|(k, v)| row.get(k) == Some(v)))
            .map(|(pk, fields)| Row {
                pk: pk.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn count(&self, entity_type: &str) -> Result<usize, StoreError> {
        Ok(lock(&self.inner).table(entity_type)?.len())
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Row>, StoreError> {
        let inner = lock(&self.inner);
        Ok(inner
            .table(entity_type)?
            .iter()
            .map(|(pk, fields)| Row {
                pk: pk.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn create(
        &self,
        txn: &mut MemoryTxn,
        entity_type: &str,
        pk: Option<PrimaryKey>,
        fields: FieldMap,
    ) -> Result<Row, StoreError> {
        let mut inner = lock(&self.inner);
        let pk = match pk {
            Some(pk) => pk,
            None => inner.next_key(entity_type)?,
        };
        if inner.table(entity_type)?.contains_key(&pk) {
            return Err(StoreError::DuplicatePrimaryKey {
                entity_type: entity_type.to_string(),
                pk,
            });
        }
        let schema = inner.schema(entity_type)?.clone();
        inner.validate(&schema, &pk, &fields)?;
        inner
            .table_mut(entity_type)?
            .insert(pk.clone(), fields.clone());
        txn.undo.push(Undo::Created {
            entity_type: entity_type.to_string(),
            pk: pk.clone(),
        });
        Ok(Row { pk, fields })
    }

    async fn update(
        &self,
        txn: &mut MemoryTxn,
        entity_type: &str,
        pk: &PrimaryKey,
        fields: FieldMap,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        let previous = inner
            .table(entity_type)?
            .get(pk)
            .cloned()
            .ok_or_else(|| StoreError::RowNotFound {
                entity_type: entity_type.to_string(),
                pk: pk.clone(),
            })?;
        let mut merged = previous.clone();
        merged.extend(fields);
        let schema = inner.schema(entity_type)?.clone();
        inner.validate(&schema, pk, &merged)?;
        inner.table_mut(entity_type)?.insert(pk.clone(), merged);
        txn.undo.push(Undo::Updated {
            entity_type: entity_type.to_string(),
            pk: pk.clone(),
            previous,
        });
        Ok(())
    }

    async fn delete_all(
        &self,
        txn: &mut MemoryTxn,
        entity_type: &str,
        protected: &BTreeSet<String>,
    ) -> Result<usize, StoreError> {
        let mut inner = lock(&self.inner);
        inner.schema(entity_type)?;
        if protected.contains(entity_type) {
            return Ok(0);
        }
        {
            let table = inner.table(entity_type)?;
            let pks: BTreeSet<&PrimaryKey> = table.keys().collect();
            if let Some(err) = inner.referencing(entity_type, &pks) {
                return Err(err);
            }
        }
        let rows = std::mem::take(inner.table_mut(entity_type)?);
        let removed = rows.len();
        txn.undo.push(Undo::Deleted {
            entity_type: entity_type.to_string(),
            rows,
        });
        Ok(removed)
    }
}
