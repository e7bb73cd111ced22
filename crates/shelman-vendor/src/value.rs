//! Typed accessors over vendor JSON documents with path-carrying errors.

use serde_json::{Map, Value};

use crate::error::{ConvertError, Result};

pub(crate) fn parse_document(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw).map_err(|err| ConvertError::InvalidJson {
        detail: err.to_string(),
    })
}

pub(crate) fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| ConvertError::UnexpectedType {
        path: path.to_string(),
        expected: "object",
    })
}

/// Optional nested object; `Null` and absence both read as `None`.
pub(crate) fn opt_object<'a>(
    fields: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<&'a Map<String, Value>>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_object(value, &join(path, key)).map(Some),
    }
}

pub(crate) fn opt_array<'a>(
    fields: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<&'a Vec<Value>>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(ConvertError::UnexpectedType {
            path: join(path, key),
            expected: "array",
        }),
    }
}

pub(crate) fn opt_str(
    fields: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(ConvertError::UnexpectedType {
            path: join(path, key),
            expected: "string",
        }),
    }
}

pub(crate) fn opt_bool(fields: &Map<String, Value>, key: &str, path: &str) -> Result<Option<bool>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(ConvertError::UnexpectedType {
            path: join(path, key),
            expected: "boolean",
        }),
    }
}

pub(crate) fn opt_f64(fields: &Map<String, Value>, key: &str, path: &str) -> Result<Option<f64>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(_) => Err(ConvertError::UnexpectedType {
            path: join(path, key),
            expected: "number",
        }),
    }
}

pub(crate) fn opt_u32(fields: &Map<String, Value>, key: &str, path: &str) -> Result<Option<u32>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .map(Some)
            .ok_or_else(|| ConvertError::UnexpectedType {
                path: join(path, key),
                expected: "unsigned integer",
            }),
        Some(_) => Err(ConvertError::UnexpectedType {
            path: join(path, key),
            expected: "unsigned integer",
        }),
    }
}

pub(crate) fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Insert a key only when the value is set; keeps emitted documents minimal.
pub(crate) fn put<T: Into<Value>>(fields: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value.into());
    }
}

/// Insert a nested object only when it has content.
pub(crate) fn put_object(fields: &mut Map<String, Value>, key: &str, value: Map<String, Value>) {
    if !value.is_empty() {
        fields.insert(key.to_string(), Value::Object(value));
    }
}
