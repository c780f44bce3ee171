//! # Schema Validation
//!
//! A JSON-schema subset sufficient for the tool contracts in [`crate::tools`].
//! Validation walks the whole document and reports every violation, each with a
//! JSON-pointer path to the offending fragment.
//!
//! Supported keywords: `type`, `required`, `properties`,
//! `additionalProperties: false`, `items`, `minItems`, `maxItems`, `minLength`,
//! `enum`, `minimum`, `exclusiveMinimum`, `maximum`, and `format` with the values
//! `date` (`YYYY-MM-DD`) and `tenor` (`3M`, `10Y`, ...).

use std::fmt::{Display, Formatter};

use ferroquant_kernel::{parse_date, Tenor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One offending input fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// JSON pointer into the input, `/` for the document root.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: if path.is_empty() { String::from("/") } else { path },
            message: message.into(),
        }
    }
}

impl Display for SchemaViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validates `value` against `schema`, collecting every violation.
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), Vec<SchemaViolation>> {
    let Some(schema) = schema.as_object() else {
        return Err(vec![SchemaViolation::new("", "schema must be an object")]);
    };

    let mut violations = Vec::new();
    validate_value(value, schema, "", &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn validate_value(
    value: &Value,
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(expected) = schema.get("type") {
        if let Some(message) = type_mismatch(value, expected) {
            violations.push(SchemaViolation::new(path, message));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let listed = allowed
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            violations.push(SchemaViolation::new(
                path,
                format!("must be one of {listed}, found {value}"),
            ));
        }
    }

    match value {
        Value::Object(object) => validate_object(object, schema, path, violations),
        Value::Array(items) => validate_array(items, schema, path, violations),
        Value::String(text) => validate_string(text, schema, path, violations),
        Value::Number(number) => {
            if let Some(number) = number.as_f64() {
                validate_number(number, schema, path, violations);
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn validate_object(
    object: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                violations.push(SchemaViolation::new(
                    format!("{path}/{field}"),
                    format!("required field '{field}' is missing"),
                ));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional = schema.get("additionalProperties");
    let closed = additional == Some(&Value::Bool(false));
    let open_schema = additional.and_then(Value::as_object);

    for (key, child) in object {
        let child_path = format!("{path}/{}", escape_pointer(key));
        match properties.and_then(|properties| properties.get(key)) {
            Some(Value::Object(child_schema)) => {
                validate_value(child, child_schema, &child_path, violations);
            }
            Some(_) => {}
            None if closed => {
                violations.push(SchemaViolation::new(child_path, "unknown field"));
            }
            None => {
                if let Some(child_schema) = open_schema {
                    validate_value(child, child_schema, &child_path, violations);
                }
            }
        }
    }
}

fn validate_array(
    items: &[Value],
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            violations.push(SchemaViolation::new(
                path,
                format!("must have at least {min} items, found {}", items.len()),
            ));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            violations.push(SchemaViolation::new(
                path,
                format!("must have at most {max} items, found {}", items.len()),
            ));
        }
    }

    if let Some(item_schema) = schema.get("items").and_then(Value::as_object) {
        for (index, item) in items.iter().enumerate() {
            validate_value(item, item_schema, &format!("{path}/{index}"), violations);
        }
    }
}

fn validate_string(
    text: &str,
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        let len = text.chars().count();
        if (len as u64) < min {
            violations.push(SchemaViolation::new(
                path,
                format!("must have at least {min} characters, found {len}"),
            ));
        }
    }

    match schema.get("format").and_then(Value::as_str) {
        Some("date") => {
            if let Err(error) = parse_date(text) {
                violations.push(SchemaViolation::new(path, error.to_string()));
            }
        }
        Some("tenor") => {
            if let Err(error) = text.parse::<Tenor>() {
                violations.push(SchemaViolation::new(path, error.to_string()));
            }
        }
        _ => {}
    }
}

fn validate_number(
    number: f64,
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        if number < minimum {
            violations.push(SchemaViolation::new(
                path,
                format!("must be at least {minimum}, found {number}"),
            ));
        }
    }
    if let Some(minimum) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
        if number <= minimum {
            violations.push(SchemaViolation::new(
                path,
                format!("must be greater than {minimum}, found {number}"),
            ));
        }
    }
    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
        if number > maximum {
            violations.push(SchemaViolation::new(
                path,
                format!("must be at most {maximum}, found {number}"),
            ));
        }
    }
}

/// `None` when `value` has one of the `expected` types.
fn type_mismatch(value: &Value, expected: &Value) -> Option<String> {
    let expected_types = match expected {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => return None,
    };

    if expected_types.iter().any(|name| type_matches(value, name)) {
        return None;
    }

    Some(format!(
        "expected type '{}', found '{}'",
        expected_types.join("' or '"),
        value_type_name(value)
    ))
}

fn type_matches(value: &Value, name: &str) -> bool {
    match (name, value) {
        ("object", Value::Object(_))
        | ("array", Value::Array(_))
        | ("string", Value::String(_))
        | ("number", Value::Number(_))
        | ("boolean", Value::Bool(_))
        | ("null", Value::Null) => true,
        ("integer", Value::Number(number)) => number.is_i64() || number.is_u64(),
        _ => false,
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
