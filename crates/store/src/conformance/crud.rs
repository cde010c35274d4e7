//! Resolution and row CRUD conformance tests.

use std::future::Future;

use super::{
    classroom_fields, fixture_schemas, insert, student_fields, text, TestResult, CLASSROOM,
    STUDENT,
};
use crate::record::{FieldMap, FieldValue, PrimaryKey};
use crate::schema::SchemaDescriptor;
use crate::{ModelRegistry, StoreError};

pub(super) async fn run_crud_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "crud",
            "resolve_returns_registered_schema",
            resolve_returns_registered_schema(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "resolve_unknown_type_fails",
            resolve_unknown_type_fails(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "create_with_given_key",
            create_with_given_key(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "create_assigns_key_when_absent",
            create_assigns_key_when_absent(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "create_duplicate_key_is_duplicate_error",
            create_duplicate_key_is_duplicate_error(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "create_rejects_dangling_reference",
            create_rejects_dangling_reference(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "update_is_partial",
            update_is_partial(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "get_missing_row_is_none",
            get_missing_row_is_none(factory).await,
        ),
    ]
}

async fn resolve_returns_registered_schema<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let schema = store
        .resolve(STUDENT)
        .await
        .map_err(|e| format!("resolve failed: {e}"))?;
    if schema.field("admission_number").is_none() {
        return Err("resolved schema lacks admission_number".to_string());
    }
    let types = store
        .entity_types()
        .await
        .map_err(|e| format!("entity_types failed: {e}"))?;
    if !types.iter().any(|t| t == CLASSROOM) {
        return Err(format!("entity_types missing {CLASSROOM}: {types:?}"));
    }
    Ok(())
}

async fn resolve_unknown_type_fails<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    match store.resolve("school.nosuchthing").await {
        Err(StoreError::UnknownEntityType { entity_type }) if entity_type == "school.nosuchthing" => {
            Ok(())
        }
        other => Err(format!("expected UnknownEntityType, got {other:?}")),
    }
}

async fn create_with_given_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let pk = insert(&store, CLASSROOM, Some(PrimaryKey::Int(40)), classroom_fields("VII-A")).await?;
    if pk != PrimaryKey::Int(40) {
        return Err(format!("expected key 40, got {pk}"));
    }
    let row = store
        .get(CLASSROOM, &pk)
        .await
        .map_err(|e| format!("get failed: {e}"))?
        .ok_or("row not readable after commit")?;
    if row.get("name") != Some(&text("VII-A")) {
        return Err(format!("unexpected fields: {:?}", row.fields));
    }
    Ok(())
}

async fn create_assigns_key_when_absent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let first = insert(&store, CLASSROOM, None, classroom_fields("I-A")).await?;
    let second = insert(&store, CLASSROOM, None, classroom_fields("I-B")).await?;
    if first == second {
        return Err(format!("generated keys collide: {first}"));
    }
    let count = store
        .count(CLASSROOM)
        .await
        .map_err(|e| format!("count failed: {e}"))?;
    if count != 2 {
        return Err(format!("expected 2 rows, got {count}"));
    }
    Ok(())
}

async fn create_duplicate_key_is_duplicate_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    insert(&store, CLASSROOM, Some(PrimaryKey::Int(1)), classroom_fields("II-A")).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let by_pk = store
        .create(&mut txn, CLASSROOM, Some(PrimaryKey::Int(1)), classroom_fields("II-B"))
        .await;
    let by_unique = store
        .create(&mut txn, CLASSROOM, Some(PrimaryKey::Int(2)), classroom_fields("II-A"))
        .await;
    let _ = store.rollback(txn).await;

    match (by_pk, by_unique) {
        (Err(a), Err(b)) if a.is_duplicate() && b.is_duplicate() => Ok(()),
        (a, b) => Err(format!("expected two duplicate errors, got {a:?} / {b:?}")),
    }
}

async fn create_rejects_dangling_reference<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let result = store
        .create(&mut txn, STUDENT, None, student_fields("Asha", "S-1", Some(99)))
        .await;
    let _ = store.rollback(txn).await;
    match result {
        Err(StoreError::ForeignKeyViolation { .. }) => Ok(()),
        other => Err(format!("expected ForeignKeyViolation, got {other:?}")),
    }
}

async fn update_is_partial<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let pk = insert(&store, STUDENT, None, student_fields("Asha", "S-1", None)).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .update(
            &mut txn,
            STUDENT,
            &pk,
            FieldMap::from([("name".to_string(), text("Asha R"))]),
        )
        .await
        .map_err(|e| format!("update failed: {e}"))?;
    store
        .commit(txn)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let row = store
        .get(STUDENT, &pk)
        .await
        .map_err(|e| format!("get failed: {e}"))?
        .ok_or("row vanished after update")?;
    if row.get("name") != Some(&text("Asha R")) {
        return Err(format!("name not updated: {:?}", row.fields));
    }
    if row.get("admission_number") != Some(&FieldValue::Text("S-1".to_string())) {
        return Err(format!("untouched field changed: {:?}", row.fields));
    }
    Ok(())
}

async fn get_missing_row_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    match store.get(STUDENT, &PrimaryKey::Int(12345)).await {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {other:?}")),
    }
}
