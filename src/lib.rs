//! # searchmap
//!
//! Schema-driven deserialization of search engine responses.
//!
//! Raw JSON-decoded responses carry every field as a primitive. This
//! library walks a document's source against its collection's schema
//! (mapping) and converts fields into richer native types: base64
//! blobs into bytes, `strict_date` fields into calendar dates,
//! `strict_date_time` fields into UTC timestamps, and `{gte, lte}`
//! range fields into inclusive intervals. Values no rule matches pass
//! through unchanged.
//!
//! # Example
//!
//! ```
//! use searchmap::{deserialize, FieldValue, SchemaSource};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "properties": {
//!         "attachment": { "type": "binary" },
//!         "published": { "type": "date", "format": "strict_date" }
//!     }
//! });
//!
//! let doc = json!({
//!     "_index": "articles",
//!     "_source": { "attachment": "SGVsbG8=", "published": "2024-08-23" }
//! });
//!
//! let out = deserialize(doc, SchemaSource::Inline(&schema)).unwrap();
//! let source = out.get("_source").unwrap();
//!
//! assert_eq!(source.get("attachment").unwrap().as_bytes(), Some(&b"Hello"[..]));
//! assert!(matches!(source.get("published"), Some(FieldValue::Date(_))));
//! ```
//!
//! # Schema resolution
//!
//! Schemas come from one of three [`SchemaSource`]s: an inline mapping,
//! a resolver function, or the [`SchemaCache`], a process-wide cache
//! keyed by collection name with optional time-based expiry and a
//! background refetch sweep.
//!
//! # Conversion rules
//!
//! | Value shape | Schema leaf | Result |
//! |-------------|-------------|--------|
//! | string | `binary` | decoded bytes, or the string if undecodable |
//! | `{gte, lte}` | `integer_range` / `long_range` | inclusive [`IntRange`] |
//! | `{gte, lte}` | `date_range` + `strict_date` | inclusive [`DateRange`], or the mapping if unparseable |
//! | string | `date` + `strict_date_time` | UTC timestamp; non-zero offsets rejected |
//! | string | `date` + `strict_date` | calendar date, or the string if unparseable |
//! | (anything else) | (any) | unchanged |

mod cache;
mod document;
mod error;
mod fetch;
mod field;
mod keys;
mod value;

pub use cache::SchemaCache;
pub use document::{deserialize, deserialize_stream, deserialize_with, SchemaSource};
pub use error::Error;
pub use fetch::SchemaFetcher;
pub use field::deserialize_field;
pub use keys::{map_keys, KeyFn};
pub use value::{json_type_name, DateRange, FieldValue, IntRange};

#[cfg(feature = "remote")]
pub use fetch::HttpFetcher;
