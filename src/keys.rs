//! Key mapping over nested value trees.

use serde_json::Value;

use crate::value::FieldValue;

/// A key transformation applied to every textual mapping key in a tree.
///
/// Assumed total over key-shaped strings; key mapping has no error
/// conditions.
pub type KeyFn<'a> = &'a dyn Fn(&str) -> String;

/// Apply a key transformation recursively over a value tree.
///
/// `None` is the identity sentinel: the value is returned untouched
/// with no traversal. Objects get every key renamed and every member
/// processed recursively; arrays recurse per element. Scalar and
/// opaque native values (bytes, dates, timestamps, ranges) pass
/// through unchanged and are never descended into.
pub fn map_keys(value: FieldValue, key_fn: Option<KeyFn<'_>>) -> FieldValue {
    let Some(f) = key_fn else {
        return value;
    };

    match value {
        FieldValue::Array(items) => FieldValue::Array(
            items
                .into_iter()
                .map(|item| map_keys(item, Some(f)))
                .collect(),
        ),
        FieldValue::Object(map) => FieldValue::Object(
            map.into_iter()
                .map(|(k, v)| (f(&k), map_keys(v, Some(f))))
                .collect(),
        ),
        other => other,
    }
}

/// Structural JSON conversion fused with key mapping.
///
/// Used for envelope metadata and plain mappings, which are key-mapped
/// but never schema-converted.
pub(crate) fn json_to_field(value: Value, key_fn: Option<KeyFn<'_>>) -> FieldValue {
    match key_fn {
        None => FieldValue::from(value),
        Some(f) => match value {
            Value::Array(items) => FieldValue::Array(
                items
                    .into_iter()
                    .map(|item| json_to_field(item, Some(f)))
                    .collect(),
            ),
            Value::Object(map) => FieldValue::Object(
                map.into_iter()
                    .map(|(k, v)| (f(&k), json_to_field(v, Some(f))))
                    .collect(),
            ),
            other => FieldValue::from(other),
        },
    }
}

pub(crate) fn apply_key(key_fn: Option<KeyFn<'_>>, key: &str) -> String {
    match key_fn {
        Some(f) => f(key),
        None => key.to_string(),
    }
}
