//! # choroquery
//!
//! 面向世界地图问答的 LLM 结果缓存与请求合并服务。
//!
//! Answer a free-text question for every country in the world by asking an
//! LLM provider once per country — with a coalescing cache in front so that
//! identical concurrent sub-queries collapse into a single upstream call and
//! settled answers are replayed from a pluggable cache store.
//!
//! ## Overview
//!
//! A question is first classified into an expected answer shape (number,
//! boolean, or a fixed enum of choices). Each per-country sub-query then
//! shares that shape, which makes the fan-out highly redundant: the cache
//! store absorbs repeats across time, and the in-flight map absorbs repeats
//! within the same instant.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use choroquery::{AnswerService, Settings};
//!
//! #[tokio::main]
//! async fn main() -> choroquery::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let service = AnswerService::from_settings(&settings).await?;
//!
//!     let schema = service.classify("gpt-4", "Which side of the road do cars drive on?").await?;
//!     let countries = vec!["France".to_string(), "Japan".to_string()];
//!     for (country, answer) in service
//!         .answer_many("gpt-4", "Which side of the road do cars drive on?", &schema, &countries, 8)
//!         .await
//!     {
//!         println!("{}: {:?}", country, answer);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`answer`] | Answer domain types and shape validation |
//! | [`cache`] | Key/value store with redis, memory and null backends |
//! | [`coalesce`] | In-flight request deduplication map |
//! | [`config`] | Process settings, read once at startup |
//! | [`service`] | The coalescing handler orchestrating all of the above |
//! | [`upstream`] | Provider transport and function-calling payloads |

pub mod answer;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod service;
pub mod upstream;

// Re-export main types for convenience
pub use answer::{AnswerRequest, AnswerSchema, AnswerValue, CountryAnswer};
pub use cache::{CacheBackend, MemoryCache, NullCache, QueryKey, RedisCache};
pub use config::Settings;
pub use service::AnswerService;
pub use upstream::UpstreamClient;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
