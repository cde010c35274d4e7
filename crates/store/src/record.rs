use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

/// A row's primary key: an integer or an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    /// Render the key the way snapshot files carry it.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PrimaryKey::Int(n) => serde_json::Value::from(*n),
            PrimaryKey::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(n) => write!(f, "{}", n),
            PrimaryKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(n: i64) -> Self {
        PrimaryKey::Int(n)
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        PrimaryKey::Text(s.to_string())
    }
}

/// A native field value as held by the live store.
///
/// Decimal values are exact (`rust_decimal`), never `f64`. Anything the
/// schema does not type is carried as opaque JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(Date),
    DateTime(OffsetDateTime),
    Time(Time),
    Ref(PrimaryKey),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render the value in its snapshot (JSON) representation.
    ///
    /// Decimals become strings so no precision is lost, dates are
    /// `YYYY-MM-DD`, datetimes RFC 3339 and times `HH:MM:SS[.ffffff]`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Decimal(d) => Value::String(d.to_string()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Date(d) => {
                let fmt = format_description!("[year]-[month]-[day]");
                Value::String(d.format(fmt).unwrap_or_else(|_| d.to_string()))
            }
            FieldValue::DateTime(dt) => {
                Value::String(dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string()))
            }
            FieldValue::Time(t) => {
                let rendered = if t.nanosecond() == 0 {
                    t.format(format_description!("[hour]:[minute]:[second]"))
                } else {
                    t.format(format_description!(
                        "[hour]:[minute]:[second].[subsecond digits:6]"
                    ))
                };
                Value::String(rendered.unwrap_or_else(|_| t.to_string()))
            }
            FieldValue::Ref(pk) => pk.to_json(),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

/// Field name -> native value for one row.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A live row as returned by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub pk: PrimaryKey,
    pub fields: FieldMap,
}

impl Row {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// All fields rendered as a JSON object, in field-name order.
    pub fn fields_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use time::macros::{date, datetime, time};

    #[test]
    fn primary_key_deserializes_from_number_or_string() {
        let n: PrimaryKey = serde_json::from_str("7").unwrap();
        let s: PrimaryKey = serde_json::from_str("\"adm-7\"").unwrap();
        assert_eq!(n, PrimaryKey::Int(7));
        assert_eq!(s, PrimaryKey::Text("adm-7".to_string()));
    }

    #[test]
    fn decimal_renders_as_exact_string() {
        let v = FieldValue::Decimal(Decimal::from_str("1250.50").unwrap());
        assert_eq!(v.to_json(), serde_json::json!("1250.50"));
    }

    #[test]
    fn temporal_values_render_iso() {
        assert_eq!(
            FieldValue::Date(date!(2024 - 04 - 01)).to_json(),
            serde_json::json!("2024-04-01")
        );
        assert_eq!(
            FieldValue::DateTime(datetime!(2024-04-01 08:30:00 UTC)).to_json(),
            serde_json::json!("2024-04-01T08:30:00Z")
        );
        assert_eq!(
            FieldValue::Time(time!(08:30)).to_json(),
            serde_json::json!("08:30:00")
        );
    }

    #[test]
    fn non_finite_float_renders_null() {
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
