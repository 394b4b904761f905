//! Cache key derivation.

use crate::answer::AnswerRequest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("static pattern"));

/// Normalized lookup key shared by the cache store and the in-flight map.
///
/// Derived from the canonical JSON serialization of the request (struct field
/// order is fixed, so two semantically identical requests always serialize the
/// same way), lowercased, with every non-word character stripped. The fold is
/// deliberately coarse: requests differing only in punctuation or case of
/// their field values collapse to one entry. Questions that differ *only* in
/// punctuation therefore share an answer; callers needing finer granularity
/// must encode the distinction in the question text itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    /// Derive the key for a per-country sub-query. Pure: same request, same key.
    pub fn derive(request: &AnswerRequest) -> Self {
        let canonical = serde_json::to_string(request).unwrap_or_default();
        Self::fold(&canonical)
    }

    /// Lowercase and strip non-word characters from an already-serialized payload.
    pub fn fold(serialized: &str) -> Self {
        QueryKey(NON_WORD.replace_all(serialized, "").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QueryKey {
    fn from(s: &str) -> Self {
        QueryKey::fold(s)
    }
}
