//! `delete_all` conformance tests.

use std::collections::BTreeSet;
use std::future::Future;

use super::{
    classroom_fields, fixture_schemas, insert, student_fields, text, TestResult, CLASSROOM,
    STUDENT, USER,
};
use crate::record::FieldMap;
use crate::schema::SchemaDescriptor;
use crate::{ModelRegistry, StoreError};

pub(super) async fn run_clear_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "clear",
            "delete_all_returns_count",
            delete_all_returns_count(factory).await,
        ),
        TestResult::from_result(
            "clear",
            "delete_all_skips_protected",
            delete_all_skips_protected(factory).await,
        ),
        TestResult::from_result(
            "clear",
            "delete_all_restricted_by_references",
            delete_all_restricted_by_references(factory).await,
        ),
        TestResult::from_result(
            "clear",
            "delete_all_rolls_back",
            delete_all_rolls_back(factory).await,
        ),
    ]
}

async fn delete_all_returns_count<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    insert(&store, STUDENT, None, student_fields("A", "S-1", None)).await?;
    insert(&store, STUDENT, None, student_fields("B", "S-2", None)).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let removed = store
        .delete_all(&mut txn, STUDENT, &BTreeSet::new())
        .await
        .map_err(|e| format!("delete_all failed: {e}"))?;
    store
        .commit(txn)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let left = store
        .count(STUDENT)
        .await
        .map_err(|e| format!("count failed: {e}"))?;
    if removed != 2 || left != 0 {
        return Err(format!("removed {removed}, {left} left"));
    }
    Ok(())
}

async fn delete_all_skips_protected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    insert(
        &store,
        USER,
        None,
        FieldMap::from([("username".to_string(), text("admin"))]),
    )
    .await?;

    let protected = BTreeSet::from([USER.to_string()]);
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let removed = store
        .delete_all(&mut txn, USER, &protected)
        .await
        .map_err(|e| format!("delete_all failed: {e}"))?;
    store
        .commit(txn)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let left = store
        .count(USER)
        .await
        .map_err(|e| format!("count failed: {e}"))?;
    if removed != 0 || left != 1 {
        return Err(format!("protected type touched: removed {removed}, {left} left"));
    }
    Ok(())
}

async fn delete_all_restricted_by_references<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let room = insert(&store, CLASSROOM, None, classroom_fields("IX-A")).await?;
    let room_id = match room {
        crate::PrimaryKey::Int(n) => n,
        other => return Err(format!("expected an integer key, got {other}")),
    };
    insert(&store, STUDENT, None, student_fields("A", "S-1", Some(room_id))).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let result = store
        .delete_all(&mut txn, CLASSROOM, &BTreeSet::new())
        .await;
    let _ = store.rollback(txn).await;
    match result {
        Err(StoreError::ForeignKeyViolation { .. }) => Ok(()),
        other => Err(format!("expected ForeignKeyViolation, got {other:?}")),
    }
}

async fn delete_all_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    insert(&store, CLASSROOM, None, classroom_fields("X-A")).await?;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .delete_all(&mut txn, CLASSROOM, &BTreeSet::new())
        .await
        .map_err(|e| format!("delete_all failed: {e}"))?;
    store
        .rollback(txn)
        .await
        .map_err(|e| format!("rollback failed: {e}"))?;
    let left = store
        .count(CLASSROOM)
        .await
        .map_err(|e| format!("count failed: {e}"))?;
    if left != 1 {
        return Err(format!("expected clear to be undone, {left} rows left"));
    }
    Ok(())
}
