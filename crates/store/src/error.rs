use crate::record::PrimaryKey;

/// All errors that can be returned by a `ModelRegistry` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The dotted entity type does not name a model known to the registry.
    #[error("unknown entity type: {entity_type}")]
    UnknownEntityType { entity_type: String },

    /// No row with the given primary key exists.
    #[error("row not found: {entity_type}/{pk}")]
    RowNotFound { entity_type: String, pk: PrimaryKey },

    /// A row with this primary key already exists.
    #[error("duplicate primary key: {entity_type}/{pk}")]
    DuplicatePrimaryKey { entity_type: String, pk: PrimaryKey },

    /// The write would make two live rows share a unique-key tuple.
    #[error("unique constraint on {entity_type}({}) violated", fields.join(", "))]
    UniqueViolation {
        entity_type: String,
        fields: Vec<String>,
    },

    /// A non-nullable field was left empty.
    #[error("field {entity_type}.{field} may not be null")]
    NotNullViolation { entity_type: String, field: String },

    /// A reference points at a missing row, or a delete would orphan
    /// rows that still reference the deleted ones.
    #[error("foreign key violation on {entity_type}.{field}: {detail}")]
    ForeignKeyViolation {
        entity_type: String,
        field: String,
        detail: String,
    },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for the "already exists" family of write failures.
    ///
    /// Restore treats these as benign duplicates (outcome `skipped`)
    /// rather than genuine failures.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicatePrimaryKey { .. } | StoreError::UniqueViolation { .. }
        )
    }
}
