//! Schema-driven conversion of individual field values.
//!
//! Walks a field value against its mapping node and converts primitive
//! JSON values into richer native types: base64 blobs, integer and
//! calendar-date intervals, dates, and UTC timestamps. Values no rule
//! matches pass through unchanged.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::keys::{apply_key, KeyFn};
use crate::value::{json_type_name, DateRange, FieldValue, IntRange};

/// Convert a single field value against its schema node.
///
/// Dispatch is an ordered guard chain; the first matching rule wins:
/// arrays map element-wise, objects under a `properties`-bearing node
/// recurse per key, then the leaf `type`/`format` rules apply. A field
/// missing from `properties` is a hard error; leaf parse failures fall
/// back to the original value.
///
/// # Errors
///
/// Returns [`Error::UnknownField`] when an object member has no entry
/// in the node's `properties`, and [`Error::InvalidRangeBound`] /
/// [`Error::EmptyRange`] for malformed integer-range fields.
pub fn deserialize_field(
    value: &Value,
    schema: &Value,
    key_fn: Option<KeyFn<'_>>,
) -> Result<FieldValue, Error> {
    deserialize_value(value, schema, key_fn, "")
}

// --- Internal implementation ---

pub(crate) fn deserialize_value(
    value: &Value,
    schema: &Value,
    key_fn: Option<KeyFn<'_>>,
    path: &str,
) -> Result<FieldValue, Error> {
    // Rule 1: sequences map element-wise against the same node.
    if let Value::Array(items) = value {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}/{}", path, i);
            out.push(deserialize_value(item, schema, key_fn, &item_path)?);
        }
        return Ok(FieldValue::Array(out));
    }

    // Rule 2: objects under an interior node recurse per key through
    // the node's sub-properties. A member without a sub-property is a
    // hard error, never silently passed through.
    if let Value::Object(map) = value {
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            return deserialize_object(map, props, key_fn, path);
        }
    }

    let leaf_type = schema.get("type").and_then(Value::as_str);
    let leaf_format = schema.get("format").and_then(Value::as_str);

    // Rule 3: binary leaves decode from standard base64; undecodable
    // strings stay as-is.
    if let (Value::String(s), Some("binary")) = (value, leaf_type) {
        return Ok(match STANDARD.decode(s) {
            Ok(bytes) => FieldValue::Bytes(bytes),
            Err(_) => FieldValue::String(s.clone()),
        });
    }

    if let Value::Object(map) = value {
        if let Some((gte, lte)) = range_bounds(map) {
            // Rule 4: integer-width range leaves become inclusive
            // intervals; malformed bounds are hard errors.
            if matches!(leaf_type, Some("integer_range") | Some("long_range")) {
                return int_range(gte, lte, path);
            }

            // Rule 5: date-range leaves become calendar-date
            // intervals; an unparseable bound keeps the original
            // mapping.
            if leaf_type == Some("date_range") && leaf_format == Some("strict_date") {
                return date_range(value, gte, lte, path);
            }
        }
    }

    if let Value::String(s) = value {
        // Rule 6: strict_date_time accepts only a zero offset.
        if leaf_type == Some("date") && leaf_format == Some("strict_date_time") {
            return Ok(match parse_strict_date_time(s) {
                Some(dt) => FieldValue::DateTime(dt),
                None => FieldValue::String(s.clone()),
            });
        }

        // Rule 7: strict_date.
        if leaf_type == Some("date") && leaf_format == Some("strict_date") {
            return Ok(match parse_strict_date(s) {
                Some(d) => FieldValue::Date(d),
                None => FieldValue::String(s.clone()),
            });
        }
    }

    // Rule 8: everything else passes through unconverted.
    Ok(FieldValue::from(value.clone()))
}

fn deserialize_object(
    map: &Map<String, Value>,
    props: &Map<String, Value>,
    key_fn: Option<KeyFn<'_>>,
    path: &str,
) -> Result<FieldValue, Error> {
    let mut out = IndexMap::with_capacity(map.len());

    for (key, val) in map {
        let node = props.get(key).ok_or_else(|| Error::UnknownField {
            path: display_path(path),
            field: key.clone(),
        })?;
        let child_path = format!("{}/{}", path, key);
        let converted = deserialize_value(val, node, key_fn, &child_path)?;
        out.insert(apply_key(key_fn, key), converted);
    }

    Ok(FieldValue::Object(out))
}

fn int_range(gte: &Value, lte: &Value, path: &str) -> Result<FieldValue, Error> {
    let gte = as_int_bound(gte, path)?;
    let lte = as_int_bound(lte, path)?;

    IntRange::new(gte, lte)
        .map(FieldValue::IntRange)
        .ok_or_else(|| Error::EmptyRange {
            path: display_path(path),
            gte: gte.to_string(),
            lte: lte.to_string(),
        })
}

fn date_range(original: &Value, gte: &Value, lte: &Value, path: &str) -> Result<FieldValue, Error> {
    let parsed_gte = gte.as_str().and_then(parse_strict_date);
    let parsed_lte = lte.as_str().and_then(parse_strict_date);

    match (parsed_gte, parsed_lte) {
        (Some(g), Some(l)) => DateRange::new(g, l)
            .map(FieldValue::DateRange)
            .ok_or_else(|| Error::EmptyRange {
                path: display_path(path),
                gte: g.to_string(),
                lte: l.to_string(),
            }),
        // Either bound unparseable: keep the original mapping.
        _ => Ok(FieldValue::from(original.clone())),
    }
}

fn as_int_bound(bound: &Value, path: &str) -> Result<i64, Error> {
    bound.as_i64().ok_or_else(|| Error::InvalidRangeBound {
        path: display_path(path),
        actual: json_type_name(bound).to_string(),
    })
}

fn range_bounds(map: &Map<String, Value>) -> Option<(&Value, &Value)> {
    Some((map.get("gte")?, map.get("lte")?))
}

fn parse_strict_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_strict_date_time(s: &str) -> Option<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).ok()?;
    (dt.offset().local_minus_utc() == 0).then(|| dt.with_timezone(&Utc))
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}
