//! Deep merge of a tenant's spec fragment over an operator-provided example

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Merge two JSON documents given as raw text.
///
/// Empty input on either side counts as `{}`. Anything that is not a JSON
/// object at the top level is rejected.
pub fn merge_json(template: &str, overrides: &str) -> Result<String> {
    let template = parse_object(template, "template")?;
    let overrides = parse_object(overrides, "override")?;
    let merged = merge(&template, &overrides)?;
    serde_json::to_string(&merged)
        .map_err(|e| Error::MergeError(format!("Failed to serialize merged spec: {}", e)))
}

/// Merge `overrides` into `template`.
///
/// Keys only in the template are kept, keys in the override replace the
/// template value, and when both sides hold an object the merge recurses.
/// Arrays are replaced wholesale. A `null` override keeps the template value.
pub fn merge(template: &Value, overrides: &Value) -> Result<Value> {
    let template = as_object(template, "template")?;
    let overrides = as_object(overrides, "override")?;
    Ok(Value::Object(merge_maps(template, overrides)))
}

fn merge_maps(template: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = template.clone();
    for (key, value) in overrides {
        let next = match (template.get(key), value) {
            (Some(existing), Value::Null) => existing.clone(),
            (Some(Value::Object(base)), Value::Object(patch)) => {
                Value::Object(merge_maps(base, patch))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

fn as_object<'a>(value: &'a Value, side: &str) -> Result<&'a Map<String, Value>> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(EMPTY.get_or_init(Map::new)),
        other => Err(Error::MergeError(format!(
            "{} spec must be a JSON object, got {}",
            side,
            kind_of(other)
        ))),
    }
}

fn parse_object(raw: &str, side: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::MergeError(format!("Malformed {} spec: {}", side, e)))?;
    as_object(&value, side)?;
    Ok(value)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
