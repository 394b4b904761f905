//! Process configuration.
//!
//! Settings are read from the environment exactly once, at the composition
//! root, and handed to the service by value. Nothing here is re-read at
//! runtime; restarting the process is the way to change them.

use crate::error::ErrorContext;
use crate::{Error, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Default upstream chat-completions host.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Immutable process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Disable caching entirely (selects the null backend).
    pub no_cache: bool,
    /// Connection string for the durable networked cache backend.
    pub redis_url: Option<String>,
    /// Upstream provider base url.
    pub base_url: String,
    /// Upstream provider credential, if resolved.
    pub api_key: Option<String>,
    /// Per-request upstream timeout. Also bounds how long an in-flight
    /// deduplication entry can live: a call that times out settles, and a
    /// settled call always releases its key.
    pub timeout: Duration,
    /// Models callers may request.
    pub allowed_models: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            no_cache: false,
            redis_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            allowed_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()],
        }
    }
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// Recognized variables: `CHOROQUERY_NO_CACHE`, `REDIS_URL`,
    /// `CHOROQUERY_BASE_URL`, `CHOROQUERY_TIMEOUT_SECS`,
    /// `CHOROQUERY_MODELS` (comma-separated allow-list) and the credential
    /// sources described on [`resolve_api_key`].
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let no_cache = env::var("CHOROQUERY_NO_CACHE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let base_url = env::var("CHOROQUERY_BASE_URL").unwrap_or(defaults.base_url);
        Url::parse(&base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base url: {}", e),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(base_url.clone()),
            )
        })?;

        let timeout_secs = env::var("CHOROQUERY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let allowed_models = env::var("CHOROQUERY_MODELS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|models| !models.is_empty())
            .unwrap_or(defaults.allowed_models);

        Ok(Self {
            no_cache,
            redis_url,
            base_url,
            api_key: resolve_api_key(),
            timeout: Duration::from_secs(timeout_secs),
            allowed_models,
        })
    }
}

/// Resolve the upstream credential.
///
/// Checked in order: the OS keyring (service "choroquery", user "upstream"),
/// then the `OPENAI_API_KEY` environment variable.
pub fn resolve_api_key() -> Option<String> {
    if let Ok(entry) = keyring::Entry::new("choroquery", "upstream") {
        if let Ok(key) = entry.get_password() {
            return Some(key);
        }
    }
    env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}
