//! Natural-key lookup conformance tests.
//!
//! Restore's duplicate detection branches on how many rows `find_by`
//! returns, so "no match" must be an empty vector and pre-existing
//! duplicates must all be returned.

use std::future::Future;

use super::{classroom_fields, fixture_schemas, insert, student_fields, text, TestResult, STUDENT};
use crate::record::{FieldMap, FieldValue, PrimaryKey};
use crate::schema::SchemaDescriptor;
use crate::ModelRegistry;

pub(super) async fn run_lookup_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "lookup",
            "find_by_no_match_is_empty",
            find_by_no_match_is_empty(factory).await,
        ),
        TestResult::from_result(
            "lookup",
            "find_by_single_field",
            find_by_single_field(factory).await,
        ),
        TestResult::from_result(
            "lookup",
            "find_by_composite_key",
            find_by_composite_key(factory).await,
        ),
        TestResult::from_result(
            "lookup",
            "composite_unique_enforced",
            composite_unique_enforced(factory).await,
        ),
    ]
}

async fn find_by_no_match_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let rows = store
        .find_by(
            STUDENT,
            &FieldMap::from([("admission_number".to_string(), text("S-404"))]),
        )
        .await
        .map_err(|e| format!("find_by failed: {e}"))?;
    if !rows.is_empty() {
        return Err(format!("expected no rows, got {}", rows.len()));
    }
    Ok(())
}

async fn find_by_single_field<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let pk = insert(&store, STUDENT, None, student_fields("Ravi", "S-2", None)).await?;
    insert(&store, STUDENT, None, student_fields("Mina", "S-3", None)).await?;

    let rows = store
        .find_by(
            STUDENT,
            &FieldMap::from([("admission_number".to_string(), text("S-2"))]),
        )
        .await
        .map_err(|e| format!("find_by failed: {e}"))?;
    match rows.as_slice() {
        [row] if row.pk == pk => Ok(()),
        other => Err(format!("expected exactly row {pk}, got {other:?}")),
    }
}

async fn find_by_composite_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let room = insert(&store, super::CLASSROOM, None, classroom_fields("III-A")).await?;
    let mut fields = student_fields("Ravi", "S-2", None);
    fields.insert("classroom".to_string(), FieldValue::Ref(room.clone()));
    fields.insert("roll_number".to_string(), FieldValue::Int(7));
    insert(&store, STUDENT, None, fields).await?;

    let rows = store
        .find_by(
            STUDENT,
            &FieldMap::from([
                ("classroom".to_string(), FieldValue::Ref(room)),
                ("roll_number".to_string(), FieldValue::Int(7)),
            ]),
        )
        .await
        .map_err(|e| format!("find_by failed: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 row, got {}", rows.len()));
    }
    Ok(())
}

async fn composite_unique_enforced<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let room = insert(&store, super::CLASSROOM, None, classroom_fields("IV-A")).await?;
    let mut first = student_fields("Ravi", "S-2", None);
    first.insert("classroom".to_string(), FieldValue::Ref(room.clone()));
    first.insert("roll_number".to_string(), FieldValue::Int(1));
    insert(&store, STUDENT, Some(PrimaryKey::Int(1)), first).await?;

    let mut second = student_fields("Mina", "S-3", None);
    second.insert("classroom".to_string(), FieldValue::Ref(room));
    second.insert("roll_number".to_string(), FieldValue::Int(1));
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let result = store
        .create(&mut txn, STUDENT, Some(PrimaryKey::Int(2)), second)
        .await;
    let _ = store.rollback(txn).await;
    match result {
        Err(e) if e.is_duplicate() => Ok(()),
        other => Err(format!("expected UniqueViolation, got {other:?}")),
    }
}
