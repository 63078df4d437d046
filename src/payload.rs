//! Untyped provider response tree.
//!
//! Vendor responses are never modeled field-by-field; they are converted into
//! a [`Payload`] and handed to the extractor, which only pattern-matches on the
//! four shapes below.

use serde_json::Value;

/// Strings longer than this are elided when a payload is logged.
const LOG_STRING_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Object fields in wire order.
    Map(Vec<(String, Payload)>),
    Seq(Vec<Payload>),
    Str(String),
    /// Numbers, booleans and nulls carry no image data.
    Other,
}

impl Payload {
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is absent in the JSON sense (null, "", [] or {}).
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Map(fields) => fields.is_empty(),
            Payload::Seq(items) => items.is_empty(),
            Payload::Str(s) => s.is_empty(),
            Payload::Other => true,
        }
    }

    /// Copy of the tree with long strings replaced, for debug logging.
    pub fn truncated_for_log(&self) -> Value {
        match self {
            Payload::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.truncated_for_log()))
                    .collect(),
            ),
            Payload::Seq(items) => {
                Value::Array(items.iter().map(Payload::truncated_for_log).collect())
            }
            Payload::Str(s) if s.len() > LOG_STRING_LIMIT => {
                Value::String(format!("<long string (len={})...truncated>", s.len()))
            }
            Payload::Str(s) => Value::String(s.clone()),
            Payload::Other => Value::Null,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                Payload::Map(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
            Value::Array(items) => Payload::Seq(items.into_iter().map(Payload::from).collect()),
            Value::String(s) => Payload::Str(s),
            Value::Null | Value::Bool(_) | Value::Number(_) => Payload::Other,
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Str(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversion_preserves_field_order() {
        let payload = Payload::from(json!({ "zeta": 1, "alpha": "a", "mid": [true] }));
        let Payload::Map(fields) = payload else {
            panic!("expected map");
        };
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(fields[0].1, Payload::Other);
        assert_eq!(fields[2].1, Payload::Seq(vec![Payload::Other]));
    }

    #[test]
    fn test_get_and_is_empty() {
        let payload = Payload::from(json!({ "refusal": null, "content": "hi", "images": [] }));
        assert!(payload.get("refusal").unwrap().is_empty());
        assert!(payload.get("images").unwrap().is_empty());
        assert_eq!(payload.get("content").and_then(Payload::as_str), Some("hi"));
        assert!(payload.get("missing").is_none());
    }

    #[test]
    fn test_truncated_for_log_elides_long_strings() {
        let long = "A".repeat(600);
        let payload = Payload::from(json!({ "data": long, "note": "short" }));
        let logged = payload.truncated_for_log();
        assert_eq!(logged["data"], "<long string (len=600)...truncated>");
        assert_eq!(logged["note"], "short");
    }
}
