//! The request-coalescing answer service.
//!
//! Composition root for the core: one cache backend, one in-flight map, one
//! upstream client, wired together here and owned by the application. For a
//! single sub-query, [`AnswerService::answer`] produces a validated typed
//! answer while keeping upstream calls to the minimum: cache first, then the
//! in-flight map, and only then a fresh upstream call.

use crate::answer::{validate_value, AnswerRequest, AnswerSchema, CountryAnswer};
use crate::cache::{CacheBackend, QueryKey};
use crate::coalesce::InflightMap;
use crate::config::Settings;
use crate::error::ErrorContext;
use crate::upstream::{self, UpstreamClient, UpstreamError};
use crate::{Error, Result};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

type RawCompletion = std::result::Result<Value, UpstreamError>;

/// Default fan-out width for [`AnswerService::answer_many`].
pub const DEFAULT_CONCURRENCY: usize = 8;

pub struct AnswerService {
    cache: Arc<dyn CacheBackend>,
    inflight: InflightMap<RawCompletion>,
    upstream: UpstreamClient,
    allowed_models: Vec<String>,
}

impl AnswerService {
    /// Wire the service from explicit collaborators. Tests substitute any
    /// cache backend or upstream endpoint this way.
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        upstream: UpstreamClient,
        allowed_models: Vec<String>,
    ) -> Self {
        Self {
            cache,
            inflight: InflightMap::new(),
            upstream,
            allowed_models,
        }
    }

    /// Build the service for this process: select the cache backend once and
    /// construct the upstream client from settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let cache = crate::cache::from_settings(settings).await?;
        let upstream = UpstreamClient::new(settings)?;
        Ok(Self::new(cache, upstream, settings.allowed_models.clone()))
    }

    /// Answer one per-country sub-query.
    ///
    /// Cache hit: the stored answer is returned with no upstream traffic and
    /// no deduplication bookkeeping. Miss: the call joins an in-flight request
    /// for the same key if one exists, otherwise starts the single upstream
    /// call that every concurrent sibling will share. The settled call always
    /// releases its key, on failure paths included, so a later retry starts
    /// fresh.
    pub async fn answer(&self, request: AnswerRequest) -> Result<CountryAnswer> {
        request.validate(&self.allowed_models)?;
        let key = QueryKey::derive(&request);

        match self.cache.get(&key).await {
            Ok(Some(stored)) => match serde_json::from_str::<CountryAnswer>(&stored) {
                Ok(answer) => {
                    debug!(%key, "cache hit");
                    return Ok(answer);
                }
                Err(e) => {
                    warn!(%key, error = %e, "undeserializable cache entry, treating as miss");
                }
            },
            Ok(None) => debug!(%key, "cache miss"),
            // Documented policy: a backend fault on the read path degrades to
            // a miss rather than failing the request, but is never silent.
            Err(e) => {
                warn!(%key, backend = self.cache.name(), error = %e, "cache get failed, treating as miss");
            }
        }

        let upstream_client = self.upstream.clone();
        let payload = upstream::country_datum_payload(&request);
        let (call, started) = self.inflight.join_or_start(&key, move || {
            async move { upstream_client.complete(payload).await }.boxed()
        });
        debug!(%key, started, "awaiting upstream call");

        let raw = match call.clone().await {
            Ok(raw) => raw,
            Err(e) => {
                self.inflight.complete(&key, &call);
                return Err(Error::Upstream(e));
            }
        };

        match parse_answer(&raw, &request.schema) {
            Ok(answer) => {
                match serde_json::to_string(&answer) {
                    // A write failure is non-fatal: the answer in hand is
                    // already validated, the next request just misses again.
                    Ok(serialized) => {
                        if let Err(e) = self.cache.set(&key, &serialized, None).await {
                            warn!(%key, backend = self.cache.name(), error = %e, "cache set failed");
                        }
                    }
                    Err(e) => warn!(%key, error = %e, "failed to serialize answer for caching"),
                }
                self.inflight.complete(&key, &call);
                Ok(answer)
            }
            Err(e) => {
                self.inflight.complete(&key, &call);
                Err(e)
            }
        }
    }

    /// Classify a free-text question into the answer shape the per-country
    /// sub-queries will be validated against. Uncached: one classification
    /// precedes a whole fan-out, so there is nothing to coalesce.
    pub async fn classify(&self, model: &str, question: &str) -> Result<AnswerSchema> {
        if question.trim().is_empty() {
            return Err(Error::request_with_context(
                "question must not be empty",
                ErrorContext::new()
                    .with_field_path("question")
                    .with_source("request_validator"),
            ));
        }
        if !self.allowed_models.iter().any(|m| m == model) {
            return Err(Error::request_with_context(
                format!("model \"{}\" is not allowed", model),
                ErrorContext::new()
                    .with_field_path("model")
                    .with_source("request_validator"),
            ));
        }

        let raw = self
            .upstream
            .complete(upstream::classification_payload(model, question))
            .await
            .map_err(Error::Upstream)?;
        let args = upstream::extract_arguments(&raw)?;
        AnswerSchema::from_classification(&args)
    }

    /// Fan a question out over a list of countries with bounded concurrency.
    ///
    /// Output order follows input order. Each element carries its own result;
    /// one country failing does not abort the rest.
    pub async fn answer_many(
        &self,
        model: &str,
        question: &str,
        schema: &AnswerSchema,
        countries: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<CountryAnswer>)> {
        futures::stream::iter(countries.iter().cloned().map(|country| {
            let request = AnswerRequest {
                model: model.to_string(),
                question: question.to_string(),
                country: country.clone(),
                schema: schema.clone(),
            };
            async move { (country, self.answer(request).await) }
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await
    }

    /// Number of keys with an upstream call currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Name of the cache backend selected for this process.
    pub fn cache_backend(&self) -> &'static str {
        self.cache.name()
    }
}

/// Extract, repair and validate one country datum from a raw completion.
fn parse_answer(raw: &Value, schema: &AnswerSchema) -> Result<CountryAnswer> {
    let args = upstream::extract_arguments(raw)?;

    let country = args
        .get("country")
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            Error::response_with_context(
                "datum carries no country",
                ErrorContext::new()
                    .with_field_path("country")
                    .with_source("answer_validator"),
            )
        })?
        .to_string();

    let note = args
        .get("note")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();

    let value = validate_value(args.get("value").unwrap_or(&Value::Null), schema)?;

    Ok(CountryAnswer {
        country,
        value,
        note,
    })
}
