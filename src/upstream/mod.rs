//! Upstream provider transport.
//!
//! One `reqwest` client per process, built once from [`Settings`]. Requests
//! are chat completions with a forced function call; the raw completion body
//! is returned to the caller, which extracts and validates the function-call
//! arguments itself (each coalesced waiter validates independently).
//!
//! Every request carries a hard timeout, so a call always settles and the
//! in-flight entry registered for it is always released.

use crate::answer::{AnswerRequest, AnswerSchema};
use crate::config::Settings;
use crate::error::ErrorContext;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use thiserror::Error as ThisError;
use uuid::Uuid;

/// Transport-level failure of the upstream call.
///
/// `Clone` on purpose: one failed call is observed by every coalesced waiter,
/// each of which surfaces its own copy.
#[derive(Debug, Clone, ThisError)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable completion body: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Rate limiting and server-side faults are worth retrying; a malformed
    /// body is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Http(_) => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Decode(_) => false,
        }
    }
}

/// Client for the chat-completions endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        let pool_max_idle = env::var("CHOROQUERY_HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(32);

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(pool_max_idle)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("upstream_client"),
                )
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    /// POST a chat-completion payload and return the raw completion body.
    pub async fn complete(&self, payload: Value) -> std::result::Result<Value, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_id = Uuid::new_v4().to_string();
        tracing::info!(%request_id, %url, "dispatching upstream completion");

        let mut req = self
            .client
            .post(&url)
            .json(&payload)
            // Correlation id. The provider may ignore it, but applications can use it for linkage.
            .header("x-choroquery-request-id", &request_id);

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// Build the classification request: one forced function call that labels the
/// expected answer shape for a free-text question.
pub fn classification_payload(model: &str, question: &str) -> Value {
    json!({
        "model": model,
        "temperature": 0,
        "messages": [
            {
                "role": "system",
                "content": "Given a user query, call the function `set_query_classification` to classify the type of answer to that query"
            },
            { "role": "user", "content": question }
        ],
        "functions": [
            {
                "name": "set_query_classification",
                "description": "Return response classification for the type of answer that applies to the query",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "description": "The type of answer to respond to the query",
                            "enum": ["number", "boolean", "enum"]
                        },
                        "enumChoices": {
                            "type": "array",
                            "description": "Array of enum choices for possible answers to the question, or empty array if not an enum",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["type", "enumChoices"]
                }
            }
        ]
    })
}

/// Build the per-country answer request. The function schema pins the country
/// to the one being asked about and narrows `value` to the negotiated shape,
/// with `null` reserved for "no reliable answer".
pub fn country_datum_payload(request: &AnswerRequest) -> Value {
    json!({
        "model": request.model,
        "temperature": 0,
        "messages": [
            {
                "role": "system",
                "content": "Given a user query, call the given function with an answer from your internal knowledge tailored to the country. If the answer is not applicable or cannot be answered reliably you MUST return null for the value"
            },
            { "role": "user", "content": request.question }
        ],
        "functions": [
            {
                "name": "set_country_datum",
                "description": "Return internal knowledge about a country",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "country": {
                            "type": "string",
                            "enum": [request.country],
                            "description": "The country name for the country data being returned"
                        },
                        "value": {
                            "anyOf": [
                                {
                                    "type": "null",
                                    "description": "JSON null value if there is no answer or unsure"
                                },
                                value_schema(&request.schema)
                            ]
                        },
                        "note": {
                            "type": "string",
                            "description": "Any special information to note about the answer"
                        }
                    },
                    "required": ["country", "value", "note"]
                }
            }
        ]
    })
}

fn value_schema(schema: &AnswerSchema) -> Value {
    match schema {
        AnswerSchema::Number => json!({
            "type": "number",
            "description": "JSON Numeric value answering the question"
        }),
        AnswerSchema::Boolean => json!({
            "type": "boolean",
            "description": "JSON Boolean value answering the question"
        }),
        AnswerSchema::Enum { choices } => json!({
            "type": "string",
            "enum": choices,
            "description": "JSON enum value answering the question"
        }),
    }
}

static DIGIT_GROUPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)_(\d+)").expect("static pattern"));

/// Pull the function-call arguments out of a raw completion and parse them.
///
/// Models occasionally emit numeric literals with digit-group underscores
/// ("1_000_000"), which is not JSON; those are repaired before parsing. A
/// completion without a function call, or with arguments that are not JSON,
/// is a response-shape error.
pub fn extract_arguments(completion: &Value) -> Result<Value> {
    let arguments = completion
        .pointer("/choices/0/message/function_call/arguments")
        .and_then(|a| a.as_str())
        .ok_or_else(|| {
            Error::response_with_context(
                "completion carries no function-call arguments",
                ErrorContext::new()
                    .with_field_path("choices[0].message.function_call.arguments")
                    .with_source("upstream_client"),
            )
        })?;

    let mut repaired = arguments.to_string();
    while DIGIT_GROUPS.is_match(&repaired) {
        repaired = DIGIT_GROUPS.replace_all(&repaired, "$1$2").into_owned();
    }

    serde_json::from_str(&repaired).map_err(|e| {
        Error::response_with_context(
            format!("function-call arguments are not valid JSON: {}", e),
            ErrorContext::new()
                .with_details(arguments.to_string())
                .with_source("upstream_client"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_with_arguments(arguments: &str) -> Value {
        json!({
            "choices": [
                { "message": { "function_call": { "name": "set_country_datum", "arguments": arguments } } }
            ]
        })
    }

    #[test]
    fn test_extract_arguments_parses_json() {
        let completion =
            completion_with_arguments(r#"{"country":"France","value":67.4,"note":""}"#);
        let args = extract_arguments(&completion).unwrap();
        assert_eq!(args["country"], "France");
        assert_eq!(args["value"], json!(67.4));
    }

    #[test]
    fn test_extract_arguments_repairs_digit_underscores() {
        let completion =
            completion_with_arguments(r#"{"country":"India","value":1_428_627_663,"note":""}"#);
        let args = extract_arguments(&completion).unwrap();
        assert_eq!(args["value"], json!(1428627663_i64));
    }

    #[test]
    fn test_extract_arguments_missing_function_call() {
        let completion = json!({ "choices": [ { "message": { "content": "Paris" } } ] });
        let err = extract_arguments(&completion).unwrap_err();
        assert!(matches!(err, Error::Response { .. }));
    }

    #[test]
    fn test_extract_arguments_invalid_json() {
        let completion = completion_with_arguments("not json at all");
        let err = extract_arguments(&completion).unwrap_err();
        assert!(matches!(err, Error::Response { .. }));
    }

    #[test]
    fn test_country_datum_payload_pins_country_and_shape() {
        let request = AnswerRequest {
            model: "gpt-4".into(),
            question: "Which side of the road do cars drive on?".into(),
            country: "Japan".into(),
            schema: AnswerSchema::Enum {
                choices: vec!["left".into(), "right".into()],
            },
        };
        let payload = country_datum_payload(&request);
        let params = &payload["functions"][0]["parameters"]["properties"];
        assert_eq!(params["country"]["enum"], json!(["Japan"]));
        assert_eq!(params["value"]["anyOf"][1]["enum"], json!(["left", "right"]));
        assert_eq!(payload["temperature"], json!(0));
    }

    #[test]
    fn test_classification_payload_forces_closed_type_set() {
        let payload = classification_payload("gpt-3.5-turbo", "How tall is the tallest mountain?");
        let types =
            &payload["functions"][0]["parameters"]["properties"]["type"]["enum"];
        assert_eq!(types, &json!(["number", "boolean", "enum"]));
    }
}
