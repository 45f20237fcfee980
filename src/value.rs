//! Core value model for deserialized documents.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An inclusive integer interval, built from a `{gte, lte}` range field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntRange {
    pub gte: i64,
    pub lte: i64,
}

impl IntRange {
    /// Build an inclusive interval.
    ///
    /// Returns `None` for reversed bounds (caller should error).
    pub fn new(gte: i64, lte: i64) -> Option<Self> {
        (gte <= lte).then_some(Self { gte, lte })
    }

    /// Whether `n` falls within the interval, bounds included.
    pub fn contains(&self, n: i64) -> bool {
        self.gte <= n && n <= self.lte
    }
}

/// An inclusive calendar-date interval, built from a `{gte, lte}` range field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub gte: NaiveDate,
    pub lte: NaiveDate,
}

impl DateRange {
    /// Build an inclusive interval.
    ///
    /// Returns `None` for reversed bounds (caller should error).
    pub fn new(gte: NaiveDate, lte: NaiveDate) -> Option<Self> {
        (gte <= lte).then_some(Self { gte, lte })
    }

    /// Whether `date` falls within the interval, bounds included.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.gte <= date && date <= self.lte
    }

    /// Iterate over every day in the interval, in order.
    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.gte.iter_days().take_while(move |d| *d <= self.lte)
    }
}

/// A field value after schema-driven conversion.
///
/// Mirrors the JSON value space, extended with the native types the
/// field deserializer produces. Unconverted values map structurally
/// onto the JSON-shaped variants.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// A base64-decoded binary field.
    Bytes(Vec<u8>),
    /// A `strict_date` field.
    Date(NaiveDate),
    /// A `strict_date_time` field; always UTC.
    DateTime(DateTime<Utc>),
    IntRange(IntRange),
    DateRange(DateRange),
    Array(Vec<FieldValue>),
    /// Preserves the input's key order.
    Object(IndexMap<String, FieldValue>),
}

impl FieldValue {
    /// Member lookup; `None` for non-objects and missing keys.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::String(s),
            Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            Value::Object(map) => FieldValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Serializes back to JSON-compatible shapes: bytes as standard base64,
/// dates as `YYYY-MM-DD`, timestamps as RFC 3339 with a `Z` suffix, and
/// ranges as `{"gte", "lte"}` objects. Lets callers re-encode converted
/// documents for reindexing.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Number(n) => n.serialize(serializer),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            FieldValue::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            FieldValue::IntRange(r) => r.serialize(serializer),
            FieldValue::DateRange(r) => r.serialize(serializer),
            FieldValue::Array(items) => items.serialize(serializer),
            FieldValue::Object(map) => map.serialize(serializer),
        }
    }
}
