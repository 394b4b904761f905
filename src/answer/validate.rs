//! Shape validation for upstream answer values.
//!
//! The contract is a closed set of three shapes negotiated at classification
//! time. Validation is synchronous and allocation-light; every coalesced
//! waiter validates the shared raw completion independently.

use super::{AnswerSchema, AnswerValue};
use crate::error::ErrorContext;
use crate::{Error, Result};
use serde_json::Value;

/// Validate a raw JSON value against the expected answer schema.
///
/// `null` passes for every shape: the provider is instructed to return it when
/// no reliable answer exists, and that outcome is cacheable.
pub fn validate_value(raw: &Value, schema: &AnswerSchema) -> Result<AnswerValue> {
    if raw.is_null() {
        return Ok(AnswerValue::Null);
    }

    match schema {
        AnswerSchema::Number => match raw.as_f64() {
            Some(n) => Ok(AnswerValue::Number(n)),
            None => Err(shape_error("number", raw)),
        },
        AnswerSchema::Boolean => match raw.as_bool() {
            Some(b) => Ok(AnswerValue::Boolean(b)),
            None => Err(shape_error("boolean", raw)),
        },
        AnswerSchema::Enum { choices } => match raw.as_str() {
            Some(s) if choices.iter().any(|c| c == s) => Ok(AnswerValue::Text(s.to_string())),
            Some(s) => Err(Error::response_with_context(
                format!("value \"{}\" not in allowed enum choices", s),
                ErrorContext::new()
                    .with_field_path("value")
                    .with_details(format!("allowed: {}", choices.join(", ")))
                    .with_source("answer_validator"),
            )),
            None => Err(shape_error("enum string", raw)),
        },
    }
}

fn shape_error(expected: &str, raw: &Value) -> Error {
    let actual = match raw {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    };
    Error::response_with_context(
        format!("expected {} value, got {}", expected, actual),
        ErrorContext::new()
            .with_field_path("value")
            .with_source("answer_validator"),
    )
}
