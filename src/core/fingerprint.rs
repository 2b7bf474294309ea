//! Deterministic request identity used for caching, coalescing and breaker bucketing.

use std::fmt;

use reqwest::Method;
use serde_json::Value;
use url::Url;

/// A deterministic identifier derived from a request's method, URL and body.
///
/// The key is human-readable (`"GET https://host/path?a=1"`) so cache invalidation and
/// queue cancellation can match on substrings of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    key: String,
    bucket: String,
}

impl Fingerprint {
    /// Computes the fingerprint of a request.
    ///
    /// The fragment is dropped and query pairs are sorted, so requests that differ only in
    /// parameter order share a fingerprint. Body object keys are sorted at every level.
    pub fn new(url: &Url, method: &Method, body: Option<&Value>) -> Self {
        let bucket = bucket_of(url);

        let mut normalized = url.clone();
        normalized.set_fragment(None);
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            normalized.set_query(None);
        } else {
            pairs.sort();
            normalized.query_pairs_mut().clear().extend_pairs(pairs);
        }

        let key = match body {
            Some(b) => format!("{method} {normalized} {}", canonical(b)),
            None => format!("{method} {normalized}"),
        };

        Self { key, bucket }
    }

    /// The cache / coalescing key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The circuit-breaker bucket: origin + path, ignoring query and body.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

// Rebuilds objects in key order; insertion order is what serializes when
// serde_json's `preserve_order` is enabled anywhere in the build.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

pub(crate) fn bucket_of(url: &Url) -> String {
    format!("{}{}", url.origin().ascii_serialization(), url.path())
}
