//! Answer domain types shared by the service, the upstream client and the cache.
//!
//! The wire shapes mirror the function-calling contract negotiated with the
//! provider: a question is first classified into an [`AnswerSchema`], then each
//! per-country sub-query returns a [`CountryAnswer`] whose `value` must conform
//! to that schema (or be `null` when the model cannot answer reliably).

use crate::error::ErrorContext;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

mod validate;

pub use validate::validate_value;

/// Expected shape of the answer to a question, as classified upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnswerSchema {
    Number,
    Boolean,
    Enum {
        #[serde(rename = "enumChoices")]
        choices: Vec<String>,
    },
}

impl AnswerSchema {
    /// Short wire name of the shape, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AnswerSchema::Number => "number",
            AnswerSchema::Boolean => "boolean",
            AnswerSchema::Enum { .. } => "enum",
        }
    }

    /// Interpret the arguments of a `set_query_classification` call.
    ///
    /// The classifier always emits an `enumChoices` array (empty for
    /// non-enum shapes); an enum classification with no choices is a bad
    /// answer, not a usable schema.
    pub fn from_classification(args: &serde_json::Value) -> Result<Self> {
        let kind = args.get("type").and_then(|t| t.as_str()).ok_or_else(|| {
            Error::response_with_context(
                "classification carries no type",
                ErrorContext::new()
                    .with_field_path("type")
                    .with_source("classifier"),
            )
        })?;
        match kind {
            "number" => Ok(AnswerSchema::Number),
            "boolean" => Ok(AnswerSchema::Boolean),
            "enum" => {
                let choices: Vec<String> = args
                    .get("enumChoices")
                    .and_then(|c| c.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                if choices.is_empty() {
                    return Err(Error::response_with_context(
                        "enum classification carries no choices",
                        ErrorContext::new()
                            .with_field_path("enumChoices")
                            .with_source("classifier"),
                    ));
                }
                Ok(AnswerSchema::Enum { choices })
            }
            other => Err(Error::response_with_context(
                format!("unknown classification type \"{}\"", other),
                ErrorContext::new()
                    .with_field_path("type")
                    .with_source("classifier"),
            )),
        }
    }
}

/// A typed answer value. `Null` is a valid outcome: the model explicitly
/// reported "unknown / not applicable", which is cacheable and distinct from
/// any error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Null,
}

impl AnswerValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AnswerValue::Null)
    }
}

/// The validated per-country answer, as cached and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryAnswer {
    pub country: String,
    pub value: AnswerValue,
    pub note: String,
}

/// A single per-country sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub model: String,
    pub question: String,
    pub country: String,
    pub schema: AnswerSchema,
}

impl AnswerRequest {
    /// Validate caller input before any upstream or cache I/O.
    pub fn validate(&self, allowed_models: &[String]) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::request_with_context(
                "question must not be empty",
                ErrorContext::new()
                    .with_field_path("request.question")
                    .with_source("request_validator"),
            ));
        }
        if self.country.trim().is_empty() {
            return Err(Error::request_with_context(
                "country must not be empty",
                ErrorContext::new()
                    .with_field_path("request.country")
                    .with_source("request_validator"),
            ));
        }
        if !allowed_models.iter().any(|m| m == &self.model) {
            return Err(Error::request_with_context(
                format!("model \"{}\" is not allowed", self.model),
                ErrorContext::new()
                    .with_field_path("request.model")
                    .with_details(format!("allowed: {}", allowed_models.join(", ")))
                    .with_source("request_validator"),
            ));
        }
        if let AnswerSchema::Enum { choices } = &self.schema {
            if choices.is_empty() {
                return Err(Error::request_with_context(
                    "enum schema requires at least one choice",
                    ErrorContext::new()
                        .with_field_path("request.schema.enumChoices")
                        .with_source("request_validator"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]
    }

    fn request(schema: AnswerSchema) -> AnswerRequest {
        AnswerRequest {
            model: "gpt-4".into(),
            question: "What is the capital of France?".into(),
            country: "France".into(),
            schema,
        }
    }

    #[test]
    fn test_schema_serde_round_trip() {
        let schema = AnswerSchema::Enum {
            choices: vec!["left".into(), "right".into()],
        };
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("\"type\":\"enum\""));
        assert!(json.contains("enumChoices"));
        let back: AnswerSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn test_schema_tag_parses_wire_form() {
        let schema: AnswerSchema = serde_json::from_str(r#"{"type":"number"}"#).unwrap();
        assert_eq!(schema, AnswerSchema::Number);
    }

    #[test]
    fn test_validate_rejects_empty_question() {
        let mut req = request(AnswerSchema::Number);
        req.question = "  ".into();
        let err = req.validate(&allowed()).unwrap_err();
        assert!(matches!(err, Error::Request { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_model() {
        let mut req = request(AnswerSchema::Number);
        req.model = "gpt-9000".into();
        let err = req.validate(&allowed()).unwrap_err();
        assert!(err.to_string().contains("gpt-9000"));
    }

    #[test]
    fn test_validate_rejects_empty_enum_choices() {
        let req = request(AnswerSchema::Enum { choices: vec![] });
        assert!(req.validate(&allowed()).is_err());
    }

    #[test]
    fn test_from_classification_number() {
        let args = serde_json::json!({"type": "number", "enumChoices": []});
        assert_eq!(AnswerSchema::from_classification(&args).unwrap(), AnswerSchema::Number);
    }

    #[test]
    fn test_from_classification_enum_requires_choices() {
        let args = serde_json::json!({"type": "enum", "enumChoices": []});
        assert!(AnswerSchema::from_classification(&args).is_err());

        let args = serde_json::json!({"type": "enum", "enumChoices": ["left", "right"]});
        let schema = AnswerSchema::from_classification(&args).unwrap();
        assert_eq!(
            schema,
            AnswerSchema::Enum {
                choices: vec!["left".into(), "right".into()]
            }
        );
    }

    #[test]
    fn test_from_classification_unknown_type() {
        let args = serde_json::json!({"type": "date", "enumChoices": []});
        let err = AnswerSchema::from_classification(&args).unwrap_err();
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn test_country_answer_null_value_round_trip() {
        let answer = CountryAnswer {
            country: "Vatican City".into(),
            value: AnswerValue::Null,
            note: "no data".into(),
        };
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains("\"value\":null"));
        let back: CountryAnswer = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_null());
    }
}
