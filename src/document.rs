//! Deserialization of whole responses: documents, result envelopes,
//! and streams thereof.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::cache::SchemaCache;
use crate::error::Error;
use crate::field::deserialize_value;
use crate::keys::{apply_key, json_to_field, KeyFn};
use crate::value::{json_type_name, FieldValue};

/// Member holding a document's schema-governed payload.
const SOURCE_KEY: &str = "_source";
/// Member naming the collection a document belongs to.
const INDEX_KEY: &str = "_index";
/// Member holding a result envelope's hit list, nested one level deep.
const HITS_KEY: &str = "hits";

/// Where to find the schema for a document's collection.
#[derive(Clone, Copy)]
pub enum SchemaSource<'a> {
    /// A schema mapping given directly; applied to every document
    /// regardless of collection. Must be an object bearing a top-level
    /// `properties` node.
    Inline(&'a Value),
    /// A function invoked with the collection name; fetch errors
    /// propagate to the caller.
    Resolver(&'a dyn Fn(&str) -> Result<Value, Error>),
    /// The shared schema cache.
    Cache(&'a SchemaCache),
}

/// Deserialize a response with identity keys.
///
/// See [`deserialize_with`].
pub fn deserialize(value: Value, schemas: SchemaSource<'_>) -> Result<FieldValue, Error> {
    deserialize_with(value, schemas, None)
}

/// Deserialize a raw JSON-decoded response.
///
/// Recognizes, in order: arrays (mapped eagerly per element), result
/// envelopes (a nested `hits.hits` list: each hit is deserialized,
/// the rest of the envelope only key-mapped), document envelopes (a
/// string `_index` plus `_source`: the source is converted against
/// the collection's schema, sibling metadata only key-mapped), plain
/// mappings (key-mapped only), and scalars (unchanged).
///
/// # Errors
///
/// Returns [`Error::InvalidSchema`] for an unusable inline schema
/// argument, field-level errors from the source conversion, and
/// whatever a resolver or the cache fails with.
pub fn deserialize_with(
    value: Value,
    schemas: SchemaSource<'_>,
    key_fn: Option<KeyFn<'_>>,
) -> Result<FieldValue, Error> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| deserialize_with(item, schemas, key_fn))
            .collect::<Result<Vec<_>, _>>()
            .map(FieldValue::Array),
        Value::Object(map) => {
            if is_result_envelope(&map) {
                deserialize_result(map, schemas, key_fn)
            } else if is_document_envelope(&map) {
                deserialize_document(map, schemas, key_fn)
            } else {
                // No envelope shape: nothing is schema-governed here.
                Ok(json_to_field(Value::Object(map), key_fn))
            }
        }
        other => Ok(FieldValue::from(other)),
    }
}

/// Deserialize a stream of responses lazily.
///
/// Each element is converted on demand at its consumption point, so
/// schema fetches triggered through the cache happen per element and
/// abandoning the stream partway is safe. Single-pass vs restartable
/// follows the input iterator.
pub fn deserialize_stream<'a, I>(
    values: I,
    schemas: SchemaSource<'a>,
    key_fn: Option<KeyFn<'a>>,
) -> impl Iterator<Item = Result<FieldValue, Error>> + 'a
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: 'a,
{
    values
        .into_iter()
        .map(move |value| deserialize_with(value, schemas, key_fn))
}

// --- Internal implementation ---

fn is_result_envelope(map: &Map<String, Value>) -> bool {
    map.get(HITS_KEY)
        .and_then(|hits| hits.get(HITS_KEY))
        .is_some_and(Value::is_array)
}

fn is_document_envelope(map: &Map<String, Value>) -> bool {
    map.get(INDEX_KEY).is_some_and(Value::is_string) && map.contains_key(SOURCE_KEY)
}

fn deserialize_result(
    map: Map<String, Value>,
    schemas: SchemaSource<'_>,
    key_fn: Option<KeyFn<'_>>,
) -> Result<FieldValue, Error> {
    let mut out = IndexMap::with_capacity(map.len());

    for (key, value) in map {
        if key == HITS_KEY {
            if let Value::Object(hits) = value {
                out.insert(
                    apply_key(key_fn, &key),
                    deserialize_hits(hits, schemas, key_fn)?,
                );
                continue;
            }
            // Unreachable given the envelope predicate, but keep the
            // fallthrough total.
            out.insert(apply_key(key_fn, &key), json_to_field(value, key_fn));
        } else {
            out.insert(apply_key(key_fn, &key), json_to_field(value, key_fn));
        }
    }

    Ok(FieldValue::Object(out))
}

fn deserialize_hits(
    hits: Map<String, Value>,
    schemas: SchemaSource<'_>,
    key_fn: Option<KeyFn<'_>>,
) -> Result<FieldValue, Error> {
    let mut out = IndexMap::with_capacity(hits.len());

    for (key, value) in hits {
        if key == HITS_KEY {
            if let Value::Array(items) = value {
                let converted = items
                    .into_iter()
                    .map(|hit| deserialize_with(hit, schemas, key_fn))
                    .collect::<Result<Vec<_>, _>>()?;
                out.insert(apply_key(key_fn, &key), FieldValue::Array(converted));
                continue;
            }
            out.insert(apply_key(key_fn, &key), json_to_field(value, key_fn));
        } else {
            out.insert(apply_key(key_fn, &key), json_to_field(value, key_fn));
        }
    }

    Ok(FieldValue::Object(out))
}

fn deserialize_document(
    map: Map<String, Value>,
    schemas: SchemaSource<'_>,
    key_fn: Option<KeyFn<'_>>,
) -> Result<FieldValue, Error> {
    // Both present per the envelope predicate.
    let collection = map
        .get(INDEX_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let schema = resolve_schema(schemas, &collection)?;

    let mut out = IndexMap::with_capacity(map.len());
    for (key, value) in map {
        if key == SOURCE_KEY {
            out.insert(
                apply_key(key_fn, &key),
                deserialize_value(&value, &schema, key_fn, "")?,
            );
        } else {
            out.insert(apply_key(key_fn, &key), json_to_field(value, key_fn));
        }
    }

    Ok(FieldValue::Object(out))
}

fn resolve_schema(schemas: SchemaSource<'_>, collection: &str) -> Result<Value, Error> {
    let schema = match schemas {
        SchemaSource::Inline(value) => match value {
            Value::Object(map) if map.get("properties").is_some_and(Value::is_object) => {
                return Ok(value.clone());
            }
            Value::Object(_) => {
                return Err(Error::InvalidSchema {
                    actual: "object without \"properties\"".into(),
                })
            }
            other => {
                return Err(Error::InvalidSchema {
                    actual: json_type_name(other).to_string(),
                })
            }
        },
        SchemaSource::Resolver(f) => f(collection)?,
        SchemaSource::Cache(cache) => cache.get(collection)?,
    };

    // A resolved schema without properties keeps an empty set, so any
    // source field then fails as UnknownField (stale-schema signal).
    if schema.get("properties").is_some_and(Value::is_object) {
        Ok(schema)
    } else {
        Ok(json!({"properties": {}}))
    }
}
