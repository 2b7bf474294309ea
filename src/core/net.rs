use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde_json::Value;
use url::Url;

use crate::core::client::{Payload, RequestOptions};
use crate::core::error::FetchError;

/// Everything one network attempt needs, owned so it can move onto the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub(crate) http: Client,
    pub(crate) url: Url,
    pub(crate) options: Arc<RequestOptions>,
    pub(crate) timeout: Duration,
    pub(crate) attempt_header: Option<Arc<str>>,
}

impl Attempt {
    /// Performs one HTTP request under a deadline and decodes the JSON body.
    ///
    /// Hitting the deadline drops the in-flight request, which aborts it.
    pub(crate) async fn run(self, attempt: u32) -> Result<Payload, FetchError> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.send(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: self.url.to_string(),
                after: timeout,
            }),
        }
    }

    async fn send(&self, attempt: u32) -> Result<Payload, FetchError> {
        let mut req = self
            .http
            .request(self.options.method.clone(), self.url.clone())
            .header("accept", "application/json");
        for (name, value) in &self.options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(name) = &self.attempt_header {
            req = req.header(name.as_ref(), attempt.to_string());
        }
        if let Some(body) = &self.options.body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e, &self.url, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: self.url.to_string(),
                retry_after: retry_after_of(&resp),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&e, &self.url, self.timeout))?;
        decode_body(&text)
    }
}

/// Parses a response body; an empty body (e.g. 204) becomes `null`.
pub(crate) fn decode_body(text: &str) -> Result<Payload, FetchError> {
    if text.trim().is_empty() {
        return Ok(Arc::new(Value::Null));
    }
    let value: Value = serde_json::from_str(text)?;
    Ok(Arc::new(value))
}

// Only the delta-seconds form; HTTP-date values are ignored.
fn retry_after_of(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
