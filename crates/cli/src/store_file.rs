//! JSON store file backing the CLI.
//!
//! `{"schemas": [...], "rows": [...]}` where rows use the snapshot record
//! shape. The file is loaded into a `MemoryStore` and written back after a
//! command that changes data.

use std::path::Path;

use campus_restore::{coerce_fields, export, SnapshotRecord};
use campus_store::{MemoryStore, ModelRegistry, SchemaDescriptor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreFile {
    #[serde(default)]
    pub schemas: Vec<SchemaDescriptor>,
    #[serde(default)]
    pub rows: Vec<SnapshotRecord>,
}

/// Read the store file and seed a `MemoryStore` with its rows.
///
/// Rows are coerced against their schema but not constraint-checked, so a
/// store that already holds duplicates loads as-is.
pub fn load(path: &Path) -> Result<MemoryStore, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading store '{}': {}", path.display(), e))?;
    let file: StoreFile = serde_json::from_str(&text)
        .map_err(|e| format!("error parsing store '{}': {}", path.display(), e))?;

    let store = MemoryStore::with_schemas(file.schemas.clone());
    for (index, row) in file.rows.iter().enumerate() {
        let entity_type = row.entity_type.to_lowercase();
        let schema = file
            .schemas
            .iter()
            .find(|s| s.entity_type == entity_type)
            .ok_or_else(|| format!("store row {}: unknown entity type '{}'", index, entity_type))?;
        let pk = row
            .primary_key
            .clone()
            .ok_or_else(|| format!("store row {}: missing pk", index))?;
        let coerced = coerce_fields(schema, &row.fields);
        for warning in &coerced.warnings {
            warn!(entity_type = %entity_type, index, "{}", warning);
        }
        store
            .seed(&entity_type, pk, coerced.fields)
            .map_err(|e| format!("store row {}: {}", index, e))?;
    }
    debug!(path = %path.display(), rows = file.rows.len(), "store loaded");
    Ok(store)
}

/// Write every schema and row of `store` back to `path`.
pub async fn save(path: &Path, store: &MemoryStore) -> Result<(), String> {
    let entity_types = store
        .entity_types()
        .await
        .map_err(|e| format!("error reading store: {}", e))?;
    let mut schemas = Vec::with_capacity(entity_types.len());
    for entity_type in &entity_types {
        schemas.push(
            store
                .resolve(entity_type)
                .await
                .map_err(|e| format!("error reading store: {}", e))?,
        );
    }
    let rows = export(store, &entity_types)
        .await
        .map_err(|e| format!("error reading store: {}", e))?;
    let file = StoreFile { schemas, rows };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| format!("error serializing store: {}", e))?;
    std::fs::write(path, json)
        .map_err(|e| format!("error writing store '{}': {}", path.display(), e))
}
