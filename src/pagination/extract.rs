//! Item and cursor extraction from JSON page bodies

use crate::fetch::FetchFailure;
use serde_json::Value;

/// Object keys searched, in order, for the item array when no pointer is set
const ITEM_KEYS: &[&str] = &["data", "items", "results", "records"];

/// Parses a page body as JSON
///
/// An empty body is treated as `null` (no items). Anything else that is not
/// JSON is a malformed response and cannot be fixed by retrying.
pub fn parse_body(body: &[u8], url: &str) -> Result<Value, FetchFailure> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(body).map_err(|e| {
        FetchFailure::permanent(format!("Malformed response body from {}: {}", url, e))
    })
}

/// Extracts the page's items
///
/// With a pointer, the pointed-to value must be an array (missing or `null`
/// means an empty page). Without one, the body itself is used if it is an
/// array; otherwise the first of `data`, `items`, `results`, `records` that
/// holds an array; otherwise the whole object is a single record.
pub fn extract_items(body: &Value, pointer: Option<&str>) -> Result<Vec<Value>, FetchFailure> {
    if let Some(pointer) = pointer {
        return match body.pointer(pointer) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(FetchFailure::permanent(format!(
                "Expected an array at '{}', found {}",
                pointer,
                type_name(other)
            ))),
        };
    }

    match body {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => {
            for key in ITEM_KEYS {
                match map.get(*key) {
                    Some(Value::Array(items)) => return Ok(items.clone()),
                    Some(Value::Null) => return Ok(Vec::new()),
                    _ => {}
                }
            }
            if map.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![body.clone()])
            }
        }
        other => Err(FetchFailure::permanent(format!(
            "Expected a JSON object or array, found {}",
            type_name(other)
        ))),
    }
}

/// Reads the next-cursor token at `pointer`
///
/// Missing, `null`, `false` and empty-string tokens all mean there is no next
/// page. Numeric tokens are accepted and rendered as strings.
pub fn extract_cursor(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
