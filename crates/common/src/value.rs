//! Accessor helpers over untyped `serde_json::Value` documents.
//!
//! Activities and actors are never modeled as fixed structs: the protocol
//! allows arbitrary extension fields, and unknown fields must round-trip
//! unchanged through `put`/`get`. Every field access goes through one of
//! these helpers instead of `serde(rename)`'d structs.

use serde_json::Value;

/// Re-exported so downstream crates don't need a direct `serde_json` dependency
/// just to spell the document type.
pub type Doc = Value;

/// Read a string field.
#[must_use]
pub fn get_str<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

/// Read the `id` field as a string.
#[must_use]
pub fn get_id(doc: &Value) -> Option<&str> {
    get_str(doc, "id")
}

/// Read the `type` field as a string.
#[must_use]
pub fn get_type(doc: &Value) -> Option<&str> {
    get_str(doc, "type")
}

/// Read the `actor` field, which may be a bare string or an embedded object with `id`.
#[must_use]
pub fn get_actor(doc: &Value) -> Option<&str> {
    match doc.get("actor") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Object(_)) => doc.get("actor").and_then(get_id),
        _ => None,
    }
}

/// Read the `object` field as a bare id string, whether it is a string or an embedded object.
#[must_use]
pub fn get_object_id(doc: &Value) -> Option<&str> {
    match doc.get("object") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(obj @ Value::Object(_)) => get_id(obj),
        _ => None,
    }
}

/// Read the embedded `object` as a document, if it is one (vs. a bare string id).
#[must_use]
pub fn get_object_embedded(doc: &Value) -> Option<&Value> {
    match doc.get("object") {
        Some(obj @ Value::Object(_)) => Some(obj),
        _ => None,
    }
}

/// A field that may be a single string or a list of strings, flattened to an owned `Vec<String>`.
#[must_use]
pub fn get_str_or_list(doc: &Value, key: &str) -> Vec<String> {
    match doc.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// `attributedTo` may be a single actor, a list, or a list of mixed actor
/// types; spec.md says to "pick the `Person`". We pick the first entry whose
/// embedded `type` is `Person` (or, for bare-string entries, the first string,
/// since we can't tell its type without a fetch).
#[must_use]
pub fn get_attributed_to(doc: &Value) -> Option<String> {
    match doc.get("attributedTo") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let person = items.iter().find(|item| {
                item.as_object()
                    .and_then(|_| get_type(item))
                    .is_some_and(|t| t == "Person")
            });
            if let Some(p) = person {
                return get_id(p).map(str::to_string).or_else(|| {
                    p.as_str().map(str::to_string)
                });
            }
            items.first().and_then(|item| match item {
                Value::String(s) => Some(s.clone()),
                obj => get_id(obj).map(str::to_string),
            })
        }
        Some(obj @ Value::Object(_)) => get_id(obj).map(str::to_string),
        _ => None,
    }
}

/// `inReplyTo` as a bare id string.
#[must_use]
pub fn get_in_reply_to(doc: &Value) -> Option<&str> {
    match doc.get("inReplyTo") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(obj @ Value::Object(_)) => get_id(obj),
        _ => None,
    }
}

/// The ActivityStreams "everyone" magic URI.
pub const PUBLIC_URI: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Whether `to`/`cc` on a document include the public URI.
#[must_use]
pub fn is_public(doc: &Value) -> bool {
    get_str_or_list(doc, "to")
        .iter()
        .chain(get_str_or_list(doc, "cc").iter())
        .any(|r| r == PUBLIC_URI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_accepts_string_or_embedded() {
        let a = json!({"actor": "https://x/alice"});
        assert_eq!(get_actor(&a), Some("https://x/alice"));
        let b = json!({"actor": {"id": "https://x/bob", "type": "Person"}});
        assert_eq!(get_actor(&b), Some("https://x/bob"));
    }

    #[test]
    fn to_cc_accepts_string_or_list() {
        let d = json!({"to": "https://x/followers", "cc": ["a", "b"]});
        assert_eq!(get_str_or_list(&d, "to"), vec!["https://x/followers"]);
        assert_eq!(get_str_or_list(&d, "cc"), vec!["a", "b"]);
    }

    #[test]
    fn attributed_to_picks_person() {
        let d = json!({"attributedTo": [
            {"id": "https://x/group", "type": "Group"},
            {"id": "https://x/alice", "type": "Person"},
        ]});
        assert_eq!(get_attributed_to(&d), Some("https://x/alice".to_string()));
    }

    #[test]
    fn public_uri_detected_in_either_field() {
        let d = json!({"to": [PUBLIC_URI], "cc": []});
        assert!(is_public(&d));
        let d2 = json!({"to": [], "cc": [PUBLIC_URI]});
        assert!(is_public(&d2));
        let d3 = json!({"to": [], "cc": []});
        assert!(!is_public(&d3));
    }
}
