//! Content hashes of documents.
//!
//! A document is first reduced to canonical JSON, then hashed with SHA-256:
//!
//! - object keys are sorted,
//! - top-level `__`-prefixed keys (store bookkeeping such as `__v`) are dropped,
//! - object ids become their hex string, UUIDs their hyphenated string, dates their
//!   RFC 3339 string,
//! - numbers lose their width, so `Int32(1)`, `Int64(1)` and `Double(1.0)` agree.
//!
//! Two documents that canonicalize identically hash identically, whatever BSON types
//! carried the values.

use bson::{Bson, Document, spec::BinarySubtype};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::document::uuid_from_bson;

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Hex-encoded SHA-256 of the canonical form of `document`.
pub fn hash_document(document: &Document) -> String {
    let canonical = canonical_document(document, true);

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());

    format!("{:x}", hasher.finalize())
}

/// The canonical JSON form of `document`.
pub fn canonical_document(document: &Document, strip_internal: bool) -> Value {
    let mut entries: Vec<(&String, &Bson)> = document
        .iter()
        .filter(|(key, _)| !(strip_internal && key.starts_with("__")))
        .collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    Value::Object(
        entries
            .into_iter()
            .map(|(key, value)| (key.clone(), canonical(value)))
            .collect(),
    )
}

fn canonical(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(*flag),
        Bson::String(text) => Value::String(text.clone()),
        Bson::Int32(number) => Value::from(*number),
        Bson::Int64(number) => Value::from(*number),
        Bson::Double(number) if number.is_finite() && number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER => {
            Value::from(*number as i64)
        }
        Bson::Double(number) => Number::from_f64(*number).map_or(Value::Null, Value::Number),
        Bson::Document(document) => canonical_document(document, false),
        Bson::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(date) => Value::String(date.to_chrono().to_rfc3339()),
        Bson::Symbol(symbol) => Value::String(symbol.clone()),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
            uuid_from_bson(value).map_or(Value::Null, |uuid| Value::String(uuid.to_string()))
        }
        other => sort_keys(other.clone().into_relaxed_extjson()),
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId, Uuid};
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = doc! { "title": "a", "body": { "x": 1, "y": 2 } };
        let b = doc! { "body": { "y": 2, "x": 1 }, "title": "a" };

        assert_eq!(hash_document(&a), hash_document(&b));
    }

    #[test]
    fn numeric_width_does_not_matter() {
        let a = doc! { "count": 3_i32 };
        let b = doc! { "count": 3_i64 };
        let c = doc! { "count": 3.0 };

        assert_eq!(hash_document(&a), hash_document(&b));
        assert_eq!(hash_document(&a), hash_document(&c));
        assert_ne!(hash_document(&a), hash_document(&doc! { "count": 3.5 }));
    }

    #[test]
    fn object_ids_hash_like_their_hex_string() {
        let oid = ObjectId::new();

        assert_eq!(
            hash_document(&doc! { "owner": oid }),
            hash_document(&doc! { "owner": oid.to_hex() })
        );
    }

    #[test]
    fn uuids_canonicalize_to_strings() {
        let id = Uuid::new();

        assert_eq!(
            canonical_document(&doc! { "_id": id }, true),
            json!({ "_id": id.to_string() })
        );
    }

    #[test]
    fn bookkeeping_keys_are_ignored() {
        assert_eq!(
            hash_document(&doc! { "title": "a", "__v": 3 }),
            hash_document(&doc! { "title": "a" })
        );
    }

    #[test]
    fn content_changes_change_the_hash() {
        let hash = hash_document(&doc! { "title": "a" });

        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_document(&doc! { "title": "b" }));
    }
}
