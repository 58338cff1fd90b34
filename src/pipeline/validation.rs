//! Envelope validation: untrusted JSON in, a complete `Envelope` or the
//! first structural violation out. Pure and total.

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::pipeline::types::{Envelope, Route};

const STRUCTURED_STRING_FIELDS: &[&str] = &[
    "reason",
    "customer_name",
    "email_address",
    "product_name",
    "sentiment",
    "company_id",
    "company_name",
    "country",
    "phone",
];

/// Parse an inter-stage envelope from raw request bytes.
pub fn parse_envelope(body: &[u8]) -> Result<Envelope, SchemaError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    validate_envelope(value)
}

/// Validate an untrusted JSON value and convert it into an `Envelope`.
///
/// Unknown extra fields are tolerated and dropped.
pub fn validate_envelope(mut value: Value) -> Result<Envelope, SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;

    let message_id = require_string(obj, "message_id")?;
    if !is_header_safe(message_id) {
        return Err(wrong_type("message_id", "non-empty visible ASCII text"));
    }
    require_string(obj, "content")?;

    let timestamp = require(obj, "timestamp")?
        .as_str()
        .ok_or_else(|| wrong_type("timestamp", "an ISO-8601 string"))?;
    if DateTime::parse_from_rfc3339(timestamp).is_err() {
        return Err(SchemaError::InvalidTimestamp(timestamp.to_string()));
    }

    if let Some(metadata) = present(obj, "metadata")
        && !metadata.is_object()
    {
        return Err(wrong_type("metadata", "an object"));
    }

    if let Some(structured) = present(obj, "structured") {
        check_structured(structured)?;
    }

    if let Some(route) = present(obj, "route") {
        let route = route
            .as_str()
            .ok_or_else(|| wrong_type("route", "a string"))?;
        if !Route::ALL.iter().any(|r| r.as_str() == route) {
            return Err(SchemaError::InvalidRoute(route.to_string()));
        }
    }

    for field in ["support", "website", "finance"] {
        if let Some(payload) = present(obj, field)
            && !payload.is_object()
        {
            return Err(wrong_type(field, "an object"));
        }
    }

    let errors_field = if obj.contains_key("errors") { "errors" } else { "error" };
    if let Some(errors) = present(obj, errors_field) {
        let entries = errors
            .as_array()
            .ok_or_else(|| wrong_type(errors_field, "an array of strings"))?;
        if entries.iter().any(|e| !e.is_string()) {
            return Err(wrong_type(errors_field, "an array of strings"));
        }
    }

    // Explicit nulls on defaulted collections mean "empty". `errors` wins over
    // the legacy `error` key when both are sent.
    if let Some(obj) = value.as_object_mut() {
        if errors_field == "errors" {
            obj.remove("error");
        }
        obj.retain(|key, v| !(v.is_null() && matches!(key.as_str(), "metadata" | "errors" | "error")));
    }

    serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))
}

/// Validate an ingress request and return its `content`.
pub fn validate_ingress(value: &Value) -> Result<&str, SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;
    let content = require(obj, "content")?
        .as_str()
        .ok_or_else(|| wrong_type("content", "a string"))?;
    if content.is_empty() {
        return Err(SchemaError::Empty {
            field: "content".into(),
        });
    }
    Ok(content)
}

fn check_structured(value: &Value) -> Result<(), SchemaError> {
    let obj = value
        .as_object()
        .ok_or_else(|| wrong_type("structured", "an object"))?;

    for field in STRUCTURED_STRING_FIELDS {
        if let Some(v) = present(obj, field)
            && !v.is_string()
        {
            return Err(wrong_type(&format!("structured.{field}"), "a string"));
        }
    }
    if let Some(v) = present(obj, "escalate")
        && !v.is_boolean()
    {
        return Err(wrong_type("structured.escalate", "a boolean"));
    }
    Ok(())
}

fn require<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a Value, SchemaError> {
    present(obj, field).ok_or_else(|| SchemaError::MissingField(field.to_string()))
}

fn require_string<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, SchemaError> {
    require(obj, field)?
        .as_str()
        .ok_or_else(|| wrong_type(field, "a string"))
}

/// The id travels in the `ce-subject` header, so it must survive as one.
fn is_header_safe(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_graphic())
}

/// A field counts as present only if it exists and is not `null`.
fn present<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

fn wrong_type(field: &str, expected: &'static str) -> SchemaError {
    SchemaError::WrongType {
        field: field.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "message_id": "b6f0c9a2-0000-4000-8000-000000000001",
            "content": "I was double charged on my last invoice",
            "metadata": {},
            "timestamp": "2025-03-01T12:00:00Z",
            "structured": null,
            "route": null,
            "errors": []
        })
    }

    #[test]
    fn accepts_minimal_envelope() {
        let env = validate_envelope(valid()).unwrap();
        assert_eq!(env.content, "I was double charged on my last invoice");
        assert!(env.errors().is_empty());
    }

    #[test]
    fn tolerates_unknown_fields() {
        let mut v = valid();
        v["trace"] = json!({"hop": 3});
        assert!(validate_envelope(v).is_ok());
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(validate_envelope(json!([1, 2])), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn names_first_missing_field() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("message_id");
        v.as_object_mut().unwrap().remove("content");
        assert_eq!(
            validate_envelope(v),
            Err(SchemaError::MissingField("message_id".into()))
        );
    }

    #[test]
    fn rejects_wrong_primitive_type() {
        let mut v = valid();
        v["content"] = json!(42);
        assert!(matches!(
            validate_envelope(v),
            Err(SchemaError::WrongType { field, .. }) if field == "content"
        ));
    }

    #[test]
    fn rejects_route_outside_enum() {
        let mut v = valid();
        v["route"] = json!("billing");
        assert_eq!(
            validate_envelope(v),
            Err(SchemaError::InvalidRoute("billing".into()))
        );
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut v = valid();
        v["timestamp"] = json!("yesterday");
        assert!(matches!(
            validate_envelope(v),
            Err(SchemaError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn rejects_non_string_error_entries() {
        let mut v = valid();
        v["errors"] = json!(["ok", 3]);
        assert!(matches!(
            validate_envelope(v),
            Err(SchemaError::WrongType { field, .. }) if field == "errors"
        ));
    }

    #[test]
    fn rejects_mistyped_structured_field() {
        let mut v = valid();
        v["structured"] = json!({"escalate": "yes"});
        assert!(matches!(
            validate_envelope(v),
            Err(SchemaError::WrongType { field, .. }) if field == "structured.escalate"
        ));
    }

    #[test]
    fn accepts_partial_structured_record() {
        let mut v = valid();
        v["structured"] = json!({"email_address": "jo@acme.test"});
        v["route"] = json!("finance");
        let env = validate_envelope(v).unwrap();
        let s = env.structured.unwrap();
        assert_eq!(s.email_address.as_deref(), Some("jo@acme.test"));
        assert!(s.reason.is_none());
        assert_eq!(env.route, Some(Route::Finance));
    }

    #[test]
    fn null_collections_become_empty() {
        let mut v = valid();
        v["metadata"] = Value::Null;
        v["errors"] = Value::Null;
        let env = validate_envelope(v).unwrap();
        assert!(env.metadata.is_empty());
        assert!(env.errors().is_empty());
    }

    #[test]
    fn rejects_message_id_that_cannot_be_a_header() {
        for id in ["café-42", "two words", ""] {
            let mut v = valid();
            v["message_id"] = json!(id);
            assert!(
                matches!(
                    validate_envelope(v),
                    Err(SchemaError::WrongType { field, .. }) if field == "message_id"
                ),
                "id {id:?}"
            );
        }
    }

    #[test]
    fn errors_key_wins_over_legacy_error_key() {
        let mut v = valid();
        v["errors"] = json!(["guardian:detected:profanity"]);
        v["error"] = json!(["stale"]);
        let env = validate_envelope(v).unwrap();
        assert_eq!(env.errors().len(), 1);
        assert_eq!(env.errors().iter().next().unwrap(), "guardian:detected:profanity");
    }

    #[test]
    fn legacy_error_key_is_accepted() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("errors");
        v["error"] = json!(["customer-lookup:not-found"]);
        let env = validate_envelope(v).unwrap();
        assert_eq!(env.errors().len(), 1);
    }

    #[test]
    fn parse_envelope_rejects_non_json() {
        assert!(matches!(
            parse_envelope(b"not json"),
            Err(SchemaError::Malformed(_))
        ));
    }

    #[test]
    fn ingress_requires_non_empty_string_content() {
        assert_eq!(validate_ingress(&json!({"content": "hi"})).unwrap(), "hi");
        assert_eq!(
            validate_ingress(&json!({})),
            Err(SchemaError::MissingField("content".into()))
        );
        assert_eq!(
            validate_ingress(&json!({"content": ""})),
            Err(SchemaError::Empty {
                field: "content".into()
            })
        );
        assert!(matches!(
            validate_ingress(&json!({"content": ["a"]})),
            Err(SchemaError::WrongType { .. })
        ));
    }
}
