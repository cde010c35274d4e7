//! Field coercion: raw JSON snapshot values -> native store values.
//!
//! Coercion never fails. A value that cannot be converted degrades to
//! `FieldValue::Null` and carries a warning for the caller to log.

use std::str::FromStr;

use campus_store::{FieldDescriptor, FieldKind, FieldMap, FieldValue, PrimaryKey, SchemaDescriptor};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Outcome of coercing one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Coercion {
    pub value: FieldValue,
    /// Set when the raw value could not be converted and was nulled.
    pub warning: Option<String>,
}

impl Coercion {
    fn ok(value: FieldValue) -> Self {
        Coercion {
            value,
            warning: None,
        }
    }

    fn degraded(field: &FieldDescriptor, raw: &Value, expected: &str) -> Self {
        Coercion {
            value: FieldValue::Null,
            warning: Some(format!(
                "{}: cannot read {} as {}, stored null",
                field.name, raw, expected
            )),
        }
    }
}

/// A record's fields after coercion against a live schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoercedRecord {
    pub fields: FieldMap,
    /// Incoming field names the schema does not know.
    pub dropped: Vec<String>,
    pub warnings: Vec<String>,
}

/// Coerce every incoming field the schema knows; unknown fields are dropped.
pub fn coerce_fields(schema: &SchemaDescriptor, raw: &Map<String, Value>) -> CoercedRecord {
    let mut out = CoercedRecord::default();
    for (name, value) in raw {
        let Some(field) = schema.field(name) else {
            out.dropped.push(name.clone());
            continue;
        };
        let coerced = coerce(field, Some(value));
        if let Some(warning) = coerced.warning {
            out.warnings.push(warning);
        }
        out.fields.insert(name.clone(), coerced.value);
    }
    out
}

/// Convert one raw value to the field's native type.
pub fn coerce(field: &FieldDescriptor, raw: Option<&Value>) -> Coercion {
    let raw = match raw {
        None | Some(Value::Null) => return Coercion::ok(FieldValue::Null),
        Some(Value::String(s)) if s.is_empty() || s == "null" => {
            // Blank strings are a legitimate value for non-nullable text.
            if s.is_empty() && !field.nullable && matches!(field.kind, FieldKind::Text { .. }) {
                return Coercion::ok(FieldValue::Text(String::new()));
            }
            return Coercion::ok(FieldValue::Null);
        }
        Some(raw) => raw,
    };

    let converted = match &field.kind {
        FieldKind::Integer => to_int(raw).map(FieldValue::Int),
        FieldKind::Float => to_float(raw).map(FieldValue::Float),
        FieldKind::Decimal { decimal_places } => to_decimal(raw).map(|d| {
            let d = match decimal_places {
                Some(dp) => d.round_dp_with_strategy(*dp, RoundingStrategy::MidpointNearestEven),
                None => d,
            };
            FieldValue::Decimal(d)
        }),
        FieldKind::Boolean => Some(FieldValue::Bool(to_bool(raw))),
        FieldKind::Text { max_length } => Some(FieldValue::Text(to_text(raw, *max_length))),
        FieldKind::Date => raw.as_str().and_then(parse_date).map(FieldValue::Date),
        FieldKind::DateTime => raw
            .as_str()
            .and_then(parse_datetime)
            .map(FieldValue::DateTime),
        FieldKind::Time => raw.as_str().and_then(parse_time).map(FieldValue::Time),
        FieldKind::Reference { .. } => to_primary_key(raw).map(FieldValue::Ref),
        FieldKind::Json => Some(FieldValue::Json(raw.clone())),
    };

    match converted {
        Some(value) => Coercion::ok(value),
        None => Coercion::degraded(field, raw, kind_name(&field.kind)),
    }
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Integer => "integer",
        FieldKind::Float => "float",
        FieldKind::Decimal { .. } => "decimal",
        FieldKind::Boolean => "boolean",
        FieldKind::Text { .. } => "text",
        FieldKind::Date => "date",
        FieldKind::DateTime => "datetime",
        FieldKind::Time => "time",
        FieldKind::Reference { .. } => "reference",
        FieldKind::Json => "json",
    }
}

/// Integers go through a float so `"10.0"` and `10.7` both read as 10.
fn to_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn truncate(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

fn to_float(raw: &Value) -> Option<f64> {
    let f = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    f.is_finite().then_some(f)
}

/// Exact decimal parsing from the textual form; never via `f64`.
fn to_decimal(raw: &Value) -> Option<Decimal> {
    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn to_bool(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

fn to_text(raw: &Value, max_length: Option<usize>) -> String {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match max_length {
        Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
        _ => text,
    }
}

/// Keys keep their JSON type, matching how the codec reads `pk`.
fn to_primary_key(raw: &Value) -> Option<PrimaryKey> {
    match raw {
        Value::Number(n) => n.as_i64().map(PrimaryKey::Int),
        Value::String(s) => Some(PrimaryKey::Text(s.clone())),
        _ => None,
    }
}

// ── Temporal parsing ─────────────────────────────────────────────────────────

/// `YYYY-MM-DD`, or the date part of a datetime string.
pub fn parse_date(s: &str) -> Option<Date> {
    let s = s.trim();
    let day = s.get(..10)?;
    if s.len() > 10 && !matches!(s.as_bytes()[10], b'T' | b't' | b' ') {
        return None;
    }
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

/// ISO 8601 with a `T` or space separator, optional seconds and fraction,
/// and an optional `Z` / `±HH[:MM]` suffix. A missing offset means UTC;
/// a bare date means midnight UTC.
pub fn parse_datetime(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if s.len() == 10 {
        return parse_date(s).map(|d| d.midnight().assume_utc());
    }
    let normalized = s.replacen(' ', "T", 1);
    if let Ok(dt) = OffsetDateTime::parse(&normalized, &Rfc3339) {
        return Some(dt);
    }
    let (body, offset) = split_offset(&normalized)?;
    let (day, clock) = body.split_once('T')?;
    let naive = PrimitiveDateTime::new(
        Date::parse(day, format_description!("[year]-[month]-[day]")).ok()?,
        parse_time(clock)?,
    );
    Some(naive.assume_offset(offset))
}

/// `HH:MM[:SS[.ffffff]]`.
pub fn parse_time(s: &str) -> Option<Time> {
    let s = s.trim();
    let parsed = match s.len() {
        5 => Time::parse(s, format_description!("[hour]:[minute]")),
        8 => Time::parse(s, format_description!("[hour]:[minute]:[second]")),
        _ => Time::parse(s, format_description!("[hour]:[minute]:[second].[subsecond]")),
    };
    parsed.ok()
}

fn split_offset(s: &str) -> Option<(&str, UtcOffset)> {
    if let Some(body) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return Some((body, UtcOffset::UTC));
    }
    let time_start = s.find('T')?;
    match s[time_start..].rfind(['+', '-']) {
        Some(pos) => {
            let (body, suffix) = s.split_at(time_start + pos);
            Some((body, parse_offset(suffix)?))
        }
        None => Some((s, UtcOffset::UTC)),
    }
}

fn parse_offset(suffix: &str) -> Option<UtcOffset> {
    let sign: i8 = if suffix.starts_with('-') { -1 } else { 1 };
    let digits: String = suffix[1..].chars().filter(|c| *c != ':').collect();
    if !(digits.len() == 2 || digits.len() == 4) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i8 = digits[..2].parse().ok()?;
    let minutes: i8 = if digits.len() == 4 {
        digits[2..].parse().ok()?
    } else {
        0
    };
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime, time};

    fn field(kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor::new("f", kind).nullable()
    }

    fn value(kind: FieldKind, raw: Value) -> FieldValue {
        coerce(&field(kind), Some(&raw)).value
    }

    #[test]
    fn blank_and_literal_null_become_null() {
        for raw in [json!(""), json!("null"), Value::Null] {
            assert_eq!(value(FieldKind::Integer, raw), FieldValue::Null);
        }
        assert_eq!(coerce(&field(FieldKind::Integer), None).value, FieldValue::Null);
    }

    #[test]
    fn blank_stays_blank_for_required_text() {
        let required = FieldDescriptor::new("remarks", FieldKind::Text { max_length: None });
        assert_eq!(
            coerce(&required, Some(&json!(""))).value,
            FieldValue::Text(String::new())
        );
    }

    #[test]
    fn integers_tolerate_float_text() {
        assert_eq!(value(FieldKind::Integer, json!("10.0")), FieldValue::Int(10));
        assert_eq!(value(FieldKind::Integer, json!(7.9)), FieldValue::Int(7));
        assert_eq!(value(FieldKind::Integer, json!(" 42 ")), FieldValue::Int(42));
    }

    #[test]
    fn unparseable_integer_degrades_with_warning() {
        let c = coerce(&field(FieldKind::Integer), Some(&json!("ten")));
        assert_eq!(c.value, FieldValue::Null);
        assert!(c.warning.unwrap().contains("integer"));
    }

    #[test]
    fn decimals_are_exact() {
        assert_eq!(
            value(FieldKind::Decimal { decimal_places: None }, json!("0.10")),
            FieldValue::Decimal(Decimal::from_str("0.10").unwrap())
        );
        assert_eq!(
            value(FieldKind::Decimal { decimal_places: Some(2) }, json!(1234.565)),
            FieldValue::Decimal(Decimal::from_str("1234.56").unwrap())
        );
    }

    #[test]
    fn boolean_string_forms() {
        for truthy in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(value(FieldKind::Boolean, json!(truthy)), FieldValue::Bool(true));
        }
        for falsy in ["false", "0", "no", "off", "maybe"] {
            assert_eq!(value(FieldKind::Boolean, json!(falsy)), FieldValue::Bool(false));
        }
        assert_eq!(value(FieldKind::Boolean, json!(2)), FieldValue::Bool(true));
        assert_eq!(value(FieldKind::Boolean, json!(0)), FieldValue::Bool(false));
    }

    #[test]
    fn bounded_text_is_truncated() {
        assert_eq!(
            value(FieldKind::Text { max_length: Some(5) }, json!("Aaradhya")),
            FieldValue::Text("Aarad".to_string())
        );
        assert_eq!(
            value(FieldKind::Text { max_length: Some(3) }, json!(12345)),
            FieldValue::Text("123".to_string())
        );
    }

    #[test]
    fn datetimes_with_and_without_separator_and_offset() {
        let expected = datetime!(2024-06-01 09:15:00 UTC);
        for raw in [
            "2024-06-01T09:15:00Z",
            "2024-06-01 09:15:00",
            "2024-06-01T09:15",
            "2024-06-01T14:45:00+05:30",
            "2024-06-01T14:45:00+0530",
        ] {
            assert_eq!(parse_datetime(raw), Some(expected), "{raw}");
        }
        assert_eq!(
            parse_datetime("2024-06-01T09:15:00.250000Z").map(|d| d.millisecond()),
            Some(250)
        );
        assert_eq!(
            parse_datetime("2024-06-01"),
            Some(datetime!(2024-06-01 00:00:00 UTC))
        );
        assert_eq!(parse_datetime("01/06/2024"), None);
    }

    #[test]
    fn dates_and_times() {
        assert_eq!(
            value(FieldKind::Date, json!("2024-06-01")),
            FieldValue::Date(date!(2024 - 06 - 01))
        );
        assert_eq!(
            value(FieldKind::Date, json!("2024-06-01T10:00:00Z")),
            FieldValue::Date(date!(2024 - 06 - 01))
        );
        assert_eq!(value(FieldKind::Date, json!("2024-13-01")), FieldValue::Null);
        assert_eq!(
            value(FieldKind::Time, json!("08:05")),
            FieldValue::Time(time!(08:05))
        );
    }

    #[test]
    fn references_keep_their_json_type() {
        let kind = || FieldKind::Reference {
            target: "school.student".to_string(),
        };
        assert_eq!(value(kind(), json!(5)), FieldValue::Ref(PrimaryKey::Int(5)));
        assert_eq!(
            value(kind(), json!("007")),
            FieldValue::Ref(PrimaryKey::Text("007".to_string()))
        );
        assert_eq!(
            value(kind(), json!("uuid-1")),
            FieldValue::Ref(PrimaryKey::Text("uuid-1".to_string()))
        );
    }

    #[test]
    fn json_fields_pass_through() {
        let raw = json!({"guardian": ["mother", "father"]});
        assert_eq!(value(FieldKind::Json, raw.clone()), FieldValue::Json(raw));
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let schema = SchemaDescriptor::new(
            "school.fine",
            vec![FieldDescriptor::new("amount", FieldKind::Decimal { decimal_places: Some(2) })],
        );
        let raw = json!({"amount": "25", "legacy_code": "X"});
        let out = coerce_fields(&schema, raw.as_object().unwrap());
        assert_eq!(out.dropped, vec!["legacy_code".to_string()]);
        assert_eq!(out.fields.len(), 1);
        assert!(out.warnings.is_empty());
    }
}
