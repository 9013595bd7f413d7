//! Key-case conversion at the HTTP boundary.
//!
//! Entities serialize with snake_case fields (that is also their on-disk
//! form) while the web client speaks camelCase. Only object keys change;
//! values such as `"tier_name"` or `"training"` pass through untouched.

use crate::error::{AppError, AppResult};
use actix_web::HttpResponse;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn convert_keys(value: Value, convert: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (convert(&key), convert_keys(value, convert)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| convert_keys(v, convert)).collect()),
        other => other,
    }
}

pub fn camelize(value: Value) -> Value {
    convert_keys(value, to_camel_case)
}

pub fn decamelize(value: Value) -> Value {
    convert_keys(value, to_snake_case)
}

/// Parse a camelCase (or snake_case) JSON value into `T`.
pub fn from_client<T: DeserializeOwned>(value: Value) -> AppResult<T> {
    serde_json::from_value(decamelize(value)).map_err(|e| AppError::ValidationError(e.to_string()))
}

/// `200 OK` with `value` serialized and its keys camelized.
pub fn json_response<T: Serialize>(value: &T) -> AppResult<HttpResponse> {
    let value = serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().json(camelize(value)))
}
