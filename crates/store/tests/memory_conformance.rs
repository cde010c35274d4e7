//! Runs the registry conformance suite against `MemoryStore`, plus the
//! behaviors only the in-memory backend offers.

use campus_store::conformance::{fixture_schemas, run_conformance_suite, STUDENT};
use campus_store::{FieldMap, FieldValue, MemoryStore, ModelRegistry, PrimaryKey};

#[tokio::test]
async fn memory_store_passes_conformance() {
    let report = run_conformance_suite(|schemas| async move { MemoryStore::with_schemas(schemas) }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total >= 20);
}

#[tokio::test]
async fn seed_bypasses_unique_constraints() {
    let store = MemoryStore::with_schemas(fixture_schemas());
    let fields = FieldMap::from([
        ("name".to_string(), FieldValue::Text("Twin".to_string())),
        (
            "admission_number".to_string(),
            FieldValue::Text("S-9".to_string()),
        ),
    ]);
    store.seed(STUDENT, PrimaryKey::Int(1), fields.clone()).unwrap();
    store.seed(STUDENT, PrimaryKey::Int(2), fields).unwrap();

    let rows = store
        .find_by(
            STUDENT,
            &FieldMap::from([(
                "admission_number".to_string(),
                FieldValue::Text("S-9".to_string()),
            )]),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn generated_key_follows_highest_integer_key() {
    let store = MemoryStore::with_schemas(fixture_schemas());
    store
        .seed(
            "school.classroom",
            PrimaryKey::Int(41),
            FieldMap::from([("name".to_string(), FieldValue::Text("XI".to_string()))]),
        )
        .unwrap();
    let mut txn = store.begin().await.unwrap();
    let row = store
        .create(
            &mut txn,
            "school.classroom",
            None,
            FieldMap::from([("name".to_string(), FieldValue::Text("XII".to_string()))]),
        )
        .await
        .unwrap();
    store.commit(txn).await.unwrap();
    assert_eq!(row.pk, PrimaryKey::Int(42));
}

#[tokio::test]
async fn not_null_enforced_on_create() {
    let store = MemoryStore::with_schemas(fixture_schemas());
    let mut txn = store.begin().await.unwrap();
    let err = store
        .create(
            &mut txn,
            STUDENT,
            None,
            FieldMap::from([("name".to_string(), FieldValue::Text("NoAdm".to_string()))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        campus_store::StoreError::NotNullViolation { ref field, .. } if field == "admission_number"
    ));
}
