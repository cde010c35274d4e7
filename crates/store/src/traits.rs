use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{FieldMap, PrimaryKey, Row};
use crate::schema::SchemaDescriptor;

/// The data-access contract restore runs against.
///
/// A `ModelRegistry` resolves dotted entity types (`"<app>.<entity>"`) to
/// live schemas and exposes row-level reads and writes for them.
///
/// ## Atomic units
///
/// All mutating operations take `&mut Self::Txn`, a type representing an
/// in-progress atomic unit. The lifecycle is:
///
/// 1. `begin()`: start a unit
/// 2. Call mutating methods with `&mut txn`
/// 3. `commit(txn)`: make the writes durable and consume the unit
///    OR `rollback(txn)`: discard the writes and consume the unit
///
/// If a `Txn` is dropped without committing, its writes MUST be rolled back.
/// Restore opens one unit per record so that a failing record can never
/// undo its siblings, and one unit per entity type when clearing.
///
/// ## Lookups
///
/// Reads never signal "no match" through an error: `get` returns `None`
/// and `find_by` returns an empty vector. Errors are reserved for unknown
/// entity types and backend failures.
#[async_trait]
pub trait ModelRegistry: Send + Sync + 'static {
    /// The atomic-unit type used by this backend.
    type Txn: Send;

    // ── Unit lifecycle ───────────────────────────────────────────────────────

    async fn begin(&self) -> Result<Self::Txn, StoreError>;

    async fn commit(&self, txn: Self::Txn) -> Result<(), StoreError>;

    async fn rollback(&self, txn: Self::Txn) -> Result<(), StoreError>;

    // ── Schema ───────────────────────────────────────────────────────────────

    /// Every entity type the registry knows, in registration order.
    async fn entity_types(&self) -> Result<Vec<String>, StoreError>;

    /// Resolve an entity type to its live schema.
    ///
    /// Returns `Err(StoreError::UnknownEntityType)` for unknown types.
    async fn resolve(&self, entity_type: &str) -> Result<SchemaDescriptor, StoreError>;

    // ── Reads (outside units) ────────────────────────────────────────────────

    async fn get(&self, entity_type: &str, pk: &PrimaryKey) -> Result<Option<Row>, StoreError>;

    /// Rows whose fields equal every given value.
    async fn find_by(&self, entity_type: &str, values: &FieldMap) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, entity_type: &str) -> Result<usize, StoreError>;

    /// All rows of an entity type, in primary-key order.
    async fn list(&self, entity_type: &str) -> Result<Vec<Row>, StoreError>;

    // ── Writes (inside a unit) ───────────────────────────────────────────────

    /// Insert a row. With `pk = None` the backend assigns a key.
    ///
    /// Returns `Err(StoreError::DuplicatePrimaryKey)` if the key is taken and
    /// `Err(StoreError::UniqueViolation)` if a unique constraint would break.
    async fn create(
        &self,
        txn: &mut Self::Txn,
        entity_type: &str,
        pk: Option<PrimaryKey>,
        fields: FieldMap,
    ) -> Result<Row, StoreError>;

    /// Overwrite the given fields of an existing row; other fields keep
    /// their values.
    async fn update(
        &self,
        txn: &mut Self::Txn,
        entity_type: &str,
        pk: &PrimaryKey,
        fields: FieldMap,
    ) -> Result<(), StoreError>;

    /// Delete every row of an entity type and return how many went.
    ///
    /// Entity types listed in `protected` are never touched; the call
    /// returns `Ok(0)` for them.
    async fn delete_all(
        &self,
        txn: &mut Self::Txn,
        entity_type: &str,
        protected: &BTreeSet<String>,
    ) -> Result<usize, StoreError>;
}
