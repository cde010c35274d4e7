//! Snapshot codec.
//!
//! A snapshot is a JSON array of `{"model", "pk", "fields"}` objects. The
//! decoder validates the top-level shape and every record; it reports a
//! malformed record instead of dropping it.

use campus_store::{PrimaryKey, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How many leading records `looks_like_snapshot` inspects.
const PREFLIGHT_SAMPLE: usize = 10;

static ENTITY_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*\.[a-z_][a-z0-9_]*$").expect("entity type pattern compiles")
});

static ENTITY_TYPE_ANY_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*\.[a-zA-Z_][a-zA-Z0-9_]*$")
        .expect("entity type pattern compiles")
});

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot top level must be an array, found {found}")]
    NotAnArray { found: &'static str },
    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

/// One row captured at export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Lower-case `"<app>.<entity>"`.
    #[serde(rename = "model")]
    pub entity_type: String,
    /// `None` lets the store assign a key on insert.
    #[serde(rename = "pk", default)]
    pub primary_key: Option<PrimaryKey>,
    pub fields: Map<String, Value>,
}

impl SnapshotRecord {
    pub fn from_row(entity_type: &str, row: &Row) -> Self {
        SnapshotRecord {
            entity_type: entity_type.to_string(),
            primary_key: Some(row.pk.clone()),
            fields: row.fields_json(),
        }
    }

    pub fn app_label(&self) -> &str {
        self.entity_type
            .split_once('.')
            .map(|(app, _)| app)
            .unwrap_or(&self.entity_type)
    }
}

/// A decoded snapshot. Record order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<SnapshotRecord>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// True if `s` is a lower-case `"<app>.<entity>"` identifier.
pub fn is_valid_entity_type(s: &str) -> bool {
    ENTITY_TYPE.is_match(s)
}

/// Serialize records as a pretty-printed JSON array.
pub fn encode(records: &[SnapshotRecord]) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec_pretty(records)?)
}

/// Parse and validate a snapshot.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, FormatError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(FormatError::NotAnArray {
                found: json_kind(&other),
            })
        }
    };
    let records = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| decode_record(index, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Snapshot { records })
}

fn decode_record(index: usize, item: Value) -> Result<SnapshotRecord, FormatError> {
    let invalid = |reason: String| FormatError::InvalidRecord { index, reason };

    let kind = json_kind(&item);
    let Value::Object(mut obj) = item else {
        return Err(invalid(format!("expected an object, found {}", kind)));
    };

    let entity_type = match obj.get("model") {
        Some(Value::String(model)) if ENTITY_TYPE_ANY_CASE.is_match(model) => model.to_lowercase(),
        Some(Value::String(model)) => {
            return Err(invalid(format!("'{}' is not an <app>.<entity> type", model)))
        }
        Some(other) => {
            return Err(invalid(format!("'model' must be a string, found {}", json_kind(other))))
        }
        None => return Err(invalid("missing 'model'".to_string())),
    };

    let primary_key = match obj.get("pk") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(PrimaryKey::Text(s.clone())),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => Some(PrimaryKey::Int(n)),
            None => return Err(invalid(format!("'pk' {} is not an integer", n))),
        },
        Some(other) => {
            return Err(invalid(format!("'pk' must be a scalar, found {}", json_kind(other))))
        }
    };

    let fields = match obj.remove("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            return Err(invalid(format!("'fields' must be an object, found {}", json_kind(&other))))
        }
        None => return Err(invalid("missing 'fields'".to_string())),
    };

    Ok(SnapshotRecord {
        entity_type,
        primary_key,
        fields,
    })
}

/// Cheap pre-flight check before committing to a full restore.
///
/// True iff the value is an array and it is empty or its first ten
/// elements all carry a well-formed `model`.
pub fn looks_like_snapshot(data: &Value) -> bool {
    let Value::Array(items) = data else {
        return false;
    };
    items.iter().take(PREFLIGHT_SAMPLE).all(|item| {
        item.get("model")
            .and_then(Value::as_str)
            .is_some_and(|m| ENTITY_TYPE_ANY_CASE.is_match(m))
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_array_is_empty_snapshot() {
        let snapshot = decode(b"[]").unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn object_top_level_rejected() {
        assert!(matches!(
            decode(b"{}"),
            Err(FormatError::NotAnArray { found: "an object" })
        ));
    }

    #[test]
    fn scalar_elements_rejected() {
        assert!(matches!(
            decode(b"[1,2,3]"),
            Err(FormatError::InvalidRecord { index: 0, .. })
        ));
    }

    #[test]
    fn missing_model_rejected() {
        let err = decode(br#"[{"pk":1,"fields":{}}]"#).unwrap_err();
        assert!(err.to_string().contains("missing 'model'"));
    }

    #[test]
    fn invalid_json_rejected() {
        assert!(matches!(decode(b"[{"), Err(FormatError::Json(_))));
    }

    #[test]
    fn model_is_lower_cased() {
        let snapshot =
            decode(br#"[{"model":"School.Student","pk":"S-1","fields":{"name":"A"}}]"#).unwrap();
        let record = &snapshot.records[0];
        assert_eq!(record.entity_type, "school.student");
        assert_eq!(record.primary_key, Some(PrimaryKey::Text("S-1".to_string())));
        assert_eq!(record.app_label(), "school");
    }

    #[test]
    fn later_bad_record_reports_its_index() {
        let err = decode(
            br#"[{"model":"school.student","pk":1,"fields":{}},
                 {"model":"school.student","pk":2,"fields":[]}]"#,
        )
        .unwrap_err();
        match err {
            FormatError::InvalidRecord { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("'fields'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_or_missing_pk_means_generated() {
        let snapshot = decode(
            br#"[{"model":"school.student","pk":null,"fields":{}},
                 {"model":"school.student","fields":{}}]"#,
        )
        .unwrap();
        assert!(snapshot.records.iter().all(|r| r.primary_key.is_none()));
    }

    #[test]
    fn fractional_pk_rejected() {
        assert!(decode(br#"[{"model":"school.student","pk":1.5,"fields":{}}]"#).is_err());
    }

    #[test]
    fn encoded_records_decode_identically() {
        let records = vec![SnapshotRecord {
            entity_type: "school.fine".to_string(),
            primary_key: Some(PrimaryKey::Int(3)),
            fields: json!({"amount": "50.00", "paid": false})
                .as_object()
                .cloned()
                .unwrap(),
        }];
        let bytes = encode(&records).unwrap();
        assert_eq!(decode(&bytes).unwrap().records, records);
    }

    #[test]
    fn preflight_check() {
        assert!(looks_like_snapshot(&json!([])));
        assert!(looks_like_snapshot(&json!([{"model": "school.student"}])));
        assert!(!looks_like_snapshot(&json!({"model": "school.student"})));
        assert!(!looks_like_snapshot(&json!([{"pk": 1}])));
        assert!(!looks_like_snapshot(&json!([{"model": "student"}])));
    }

    #[test]
    fn preflight_only_samples_first_ten() {
        let mut items: Vec<Value> = (0..10).map(|_| json!({"model": "school.fine"})).collect();
        items.push(json!({"nope": true}));
        assert!(looks_like_snapshot(&Value::Array(items)));
    }
}
