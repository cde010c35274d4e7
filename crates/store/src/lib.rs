pub mod conformance;
mod error;
mod memory;
mod record;
mod schema;
mod traits;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTxn};
pub use record::{FieldMap, FieldValue, PrimaryKey, Row};
pub use schema::{FieldDescriptor, FieldKind, SchemaDescriptor};
pub use traits::ModelRegistry;
