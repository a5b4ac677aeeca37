//! Schema-driven parameter validation.
//!
//! Every tool declares a JSON Schema for its parameters. Before a handler
//! runs, [`validate_params`] checks the incoming object against it and
//! injects declared defaults. A subset of JSON Schema is supported, enough
//! for the tool catalog:
//!
//! - `required` fields
//! - `type` (`string`, `integer`, `number`, `boolean`, `array`, `object`)
//! - `enum` membership
//! - `minimum` / `maximum` for numbers
//! - `minLength` for strings (measured after trimming, so `"  "` is empty)
//! - `minItems` and string `items` for arrays
//! - `default` injection for absent optional fields
//! - `additionalProperties: false` rejects keys the schema does not declare
//!
//! Any violation is an [`ApiError::InvalidParameters`]; the upstream is
//! never contacted for a request that fails validation.

use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};

pub fn validate_params(schema: &Value, params: &Value) -> ApiResult<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ApiError::invalid(format!(
                "parameters must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        match params_obj.get(*field) {
            None | Some(Value::Null) => {
                return Err(ApiError::invalid(format!(
                    "missing required parameter: {}",
                    field
                )))
            }
            Some(_) => {}
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        let mut unknown: Vec<&str> = params_obj
            .keys()
            .filter(|k| !properties.contains_key(k.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(ApiError::invalid(format!(
                "unknown parameter(s): {}",
                unknown.join(", ")
            )));
        }
    }

    let mut result = params_obj.clone();

    for (name, prop) in &properties {
        match params_obj.get(name) {
            Some(Value::Null) | None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
            Some(value) => check_property(name, prop, value)?,
        }
    }

    Ok(Value::Object(result))
}

fn check_property(name: &str, prop: &Value, value: &Value) -> ApiResult<()> {
    if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
        if !type_matches(expected, value) {
            return Err(ApiError::invalid(format!(
                "parameter '{}' must be of type '{}', got {}",
                name,
                expected,
                json_type_name(value)
            )));
        }
    }

    if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            let allowed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            return Err(ApiError::invalid(format!(
                "parameter '{}' must be one of [{}], got {}",
                name,
                allowed.join(", "),
                value
            )));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                return Err(ApiError::invalid(format!(
                    "parameter '{}' must be >= {}, got {}",
                    name, min, value
                )));
            }
        }
        if let Some(max) = prop.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                return Err(ApiError::invalid(format!(
                    "parameter '{}' must be <= {}, got {}",
                    name, max, value
                )));
            }
        }
    }

    if let (Some(s), Some(min)) = (
        value.as_str(),
        prop.get("minLength").and_then(|m| m.as_u64()),
    ) {
        if (s.trim().chars().count() as u64) < min {
            return Err(ApiError::invalid(format!(
                "parameter '{}' must not be empty",
                name
            )));
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = prop.get("minItems").and_then(|m| m.as_u64()) {
            if (items.len() as u64) < min {
                return Err(ApiError::invalid(format!(
                    "parameter '{}' needs at least {} item(s)",
                    name, min
                )));
            }
        }
        if let Some(item_schema) = prop.get("items") {
            for (i, item) in items.iter().enumerate() {
                check_property(&format!("{}[{}]", name, i), item_schema, item)?;
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============ Accessors for validated params ============

pub fn get_str<'a>(params: &'a Value, name: &str) -> ApiResult<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .ok_or_else(|| ApiError::invalid(format!("missing required parameter: {}", name)))
}

pub fn get_opt_f64(params: &Value, name: &str) -> Option<f64> {
    params.get(name).and_then(|v| v.as_f64())
}

pub fn get_opt_usize(params: &Value, name: &str) -> Option<usize> {
    params
        .get(name)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
}

pub fn get_str_list(params: &Value, name: &str) -> ApiResult<Vec<String>> {
    params
        .get(name)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .collect()
        })
        .ok_or_else(|| ApiError::invalid(format!("missing required parameter: {}", name)))
}
