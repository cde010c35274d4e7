//! Atomic-unit conformance tests.
//!
//! Verifies that committed writes persist, rolled-back writes are
//! discarded, and a unit dropped without commit behaves like a rollback.

use std::future::Future;

use super::{classroom_fields, fixture_schemas, insert, text, TestResult, CLASSROOM};
use crate::record::{FieldMap, PrimaryKey};
use crate::schema::SchemaDescriptor;
use crate::ModelRegistry;

pub(super) async fn run_unit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "unit",
            "rollback_discards_create",
            rollback_discards_create(factory).await,
        ),
        TestResult::from_result(
            "unit",
            "rollback_restores_update",
            rollback_restores_update(factory).await,
        ),
        TestResult::from_result(
            "unit",
            "drop_without_commit_rolls_back",
            drop_without_commit_rolls_back(factory).await,
        ),
        TestResult::from_result(
            "unit",
            "units_are_independent",
            units_are_independent(factory).await,
        ),
    ]
}

async fn count<S: ModelRegistry>(store: &S) -> Result<usize, String> {
    store
        .count(CLASSROOM)
        .await
        .map_err(|e| format!("count failed: {e}"))
}

async fn rollback_discards_create<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .create(&mut txn, CLASSROOM, None, classroom_fields("V-A"))
        .await
        .map_err(|e| format!("create failed: {e}"))?;
    store
        .rollback(txn)
        .await
        .map_err(|e| format!("rollback failed: {e}"))?;
    match count(&store).await? {
        0 => Ok(()),
        n => Err(format!("expected 0 rows after rollback, got {n}")),
    }
}

async fn rollback_restores_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    let pk = insert(&store, CLASSROOM, None, classroom_fields("V-B")).await?;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .update(
            &mut txn,
            CLASSROOM,
            &pk,
            FieldMap::from([("name".to_string(), text("V-Z"))]),
        )
        .await
        .map_err(|e| format!("update failed: {e}"))?;
    store
        .rollback(txn)
        .await
        .map_err(|e| format!("rollback failed: {e}"))?;
    let row = store
        .get(CLASSROOM, &pk)
        .await
        .map_err(|e| format!("get failed: {e}"))?
        .ok_or("row missing after rollback")?;
    if row.get("name") != Some(&text("V-B")) {
        return Err(format!("update survived rollback: {:?}", row.fields));
    }
    Ok(())
}

async fn drop_without_commit_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    {
        let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
        store
            .create(&mut txn, CLASSROOM, Some(PrimaryKey::Int(9)), classroom_fields("VI-A"))
            .await
            .map_err(|e| format!("create failed: {e}"))?;
    }
    match count(&store).await? {
        0 => Ok(()),
        n => Err(format!("expected 0 rows after drop, got {n}")),
    }
}

async fn units_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ModelRegistry,
    F: Fn(Vec<SchemaDescriptor>) -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory(fixture_schemas()).await;
    insert(&store, CLASSROOM, None, classroom_fields("VIII-A")).await?;

    let mut failing = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .create(&mut failing, CLASSROOM, None, classroom_fields("VIII-B"))
        .await
        .map_err(|e| format!("create failed: {e}"))?;
    store
        .rollback(failing)
        .await
        .map_err(|e| format!("rollback failed: {e}"))?;

    insert(&store, CLASSROOM, None, classroom_fields("VIII-C")).await?;
    match count(&store).await? {
        2 => Ok(()),
        n => Err(format!("expected 2 committed rows, got {n}")),
    }
}
