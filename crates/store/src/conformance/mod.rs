//! Conformance test suite for `ModelRegistry` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `ModelRegistry` implementation can run to verify the behavior restore
//! depends on. The suite covers:
//!
//! - **Resolution**: schema lookup, unknown entity types
//! - **CRUD**: create with given/generated keys, partial updates, reads
//! - **Lookups**: `find_by` over natural keys, empty results instead of errors
//! - **Units**: committed writes persist, rolled back and dropped writes vanish
//! - **Clearing**: `delete_all` honors protected types and restrict-on-delete
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that builds
//! a fresh, empty registry holding the given schemas:
//!
//! ```ignore
//! use campus_store::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|schemas| async move {
//!         create_test_postgres_registry(schemas).await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod clear;
mod crud;
mod lookup;
mod unit;

use std::fmt;
use std::future::Future;

use crate::record::{FieldMap, FieldValue, PrimaryKey};
use crate::schema::{FieldDescriptor, FieldKind, SchemaDescriptor};
use crate::ModelRegistry;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "crud", "unit", "clear").
    pub category: String,
    /// Test name (e.g. "create_assigns_key_when_absent").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a registry backend.
///
/// The `factory` is called once per test with [`fixture_schemas`] and must
/// return a fresh registry with those entity types registered and empty.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(crud::run_crud_tests(&factory).await);
    results.extend(lookup::run_lookup_tests(&factory).await);
    results.extend(unit::run_unit_tests(&factory).await);
    results.extend(clear::run_clear_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub const CLASSROOM: &str = "school.classroom";
pub const STUDENT: &str = "school.student";
pub const USER: &str = "auth.user";

/// Schemas every conformance registry is built with.
///
/// `school.student` references `school.classroom`, carries a unique
/// `admission_number` and a composite `(classroom, roll_number)` key.
pub fn fixture_schemas() -> Vec<SchemaDescriptor> {
    vec![
        SchemaDescriptor::new(
            CLASSROOM,
            vec![FieldDescriptor::new("name", FieldKind::Text { max_length: Some(50) }).unique()],
        ),
        SchemaDescriptor::new(
            STUDENT,
            vec![
                FieldDescriptor::new("name", FieldKind::Text { max_length: Some(100) }),
                FieldDescriptor::new(
                    "admission_number",
                    FieldKind::Text {
                        max_length: Some(20),
                    },
                )
                .unique(),
                FieldDescriptor::new(
                    "classroom",
                    FieldKind::Reference {
                        target: CLASSROOM.to_string(),
                    },
                )
                .nullable(),
                FieldDescriptor::new("roll_number", FieldKind::Integer).nullable(),
            ],
        )
        .with_unique_together(&["classroom", "roll_number"]),
        SchemaDescriptor::new(
            USER,
            vec![FieldDescriptor::new("username", FieldKind::Text { max_length: Some(150) }).unique()],
        ),
    ]
}

fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.to_string())
}

fn classroom_fields(name: &str) -> FieldMap {
    FieldMap::from([("name".to_string(), text(name))])
}

fn student_fields(name: &str, admission: &str, classroom: Option<i64>) -> FieldMap {
    FieldMap::from([
        ("name".to_string(), text(name)),
        ("admission_number".to_string(), text(admission)),
        (
            "classroom".to_string(),
            classroom
                .map(|pk| FieldValue::Ref(PrimaryKey::Int(pk)))
                .unwrap_or(FieldValue::Null),
        ),
        ("roll_number".to_string(), FieldValue::Null),
    ])
}

/// Create and commit one row, mapping failures to a message.
async fn insert<S: ModelRegistry>(
    store: &S,
    entity_type: &str,
    pk: Option<PrimaryKey>,
    fields: FieldMap,
) -> Result<PrimaryKey, String> {
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let row = store
        .create(&mut txn, entity_type, pk, fields)
        .await
        .map_err(|e| format!("create {entity_type}: {e}"))?;
    store
        .commit(txn)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(row.pk)
}
