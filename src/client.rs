//! Provider API client.
//!
//! Issues authenticated requests against a Tank01-style RapidAPI host and
//! unwraps the `{statusCode, body}` envelope. Rate-limit (429) and
//! transient (timeout / 5xx) failures are retried with jittered
//! exponential backoff, each under its own bound; any other 4xx fails
//! immediately and is never retried.

use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::registry::{FeedSpec, ResponseShape};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_rate_limit_retries: u32,
    pub max_transient_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 5,
            max_transient_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    /// `base_url` carries the scheme (`https://<host>` in production).
    /// Credentials ride on every request as the RapidAPI header pair.
    pub fn new(base_url: &str, host: &str, api_key: &str, retry: RetryPolicy) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-rapidapi-key",
            api_key
                .parse()
                .map_err(|_| SyncError::AuthOrRequest("invalid API key header value".into()))?,
        );
        headers.insert(
            "x-rapidapi-host",
            host.parse()
                .map_err(|_| SyncError::AuthOrRequest("invalid API host header value".into()))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// One feed request, unwrapped to its raw records. `extra` carries
    /// call-specific parameters (the fan-out entity id) on top of the
    /// feed's fixed query.
    pub async fn fetch_records(
        &self,
        feed: &FeedSpec,
        since: Option<NaiveDate>,
        extra: &[(String, String)],
    ) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, feed.path);

        let mut query: Vec<(String, String)> = feed
            .query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let (Some(param), Some(date)) = (feed.since_param, since) {
            query.push((param.to_string(), date.format("%Y%m%d").to_string()));
        }
        query.extend(extra.iter().cloned());

        let resp = self.execute_with_retry(&url, &query).await?;
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| SyncError::AuthOrRequest(format!("malformed response body: {}", e)))?;

        unwrap_envelope(feed, &url, envelope)
    }

    /// [`fetch_records`] without call-specific parameters.
    pub async fn fetch_feed(
        &self,
        feed: &FeedSpec,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Value>> {
        self.fetch_records(feed, since, &[]).await
    }

    /// One logical GET with both retry bounds applied.
    async fn execute_with_retry(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let mut rate_limit_attempts = 0u32;
        let mut transient_attempts = 0u32;
        let mut backoff = self.retry.initial_backoff;

        loop {
            let result = self.client.get(url).query(query).send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if rate_limit_attempts >= self.retry.max_rate_limit_retries {
                            return Err(SyncError::RateLimitExceeded {
                                url: url.to_string(),
                                // Total requests issued, including the first.
                                attempts: rate_limit_attempts + 1,
                            });
                        }
                        rate_limit_attempts += 1;
                        warn!(
                            url,
                            attempt = rate_limit_attempts,
                            "rate limited, backing off"
                        );
                    } else if status.is_server_error() {
                        if transient_attempts >= self.retry.max_transient_retries {
                            return Err(SyncError::Network(format!(
                                "{} failed with {} after {} retries",
                                url, status, transient_attempts
                            )));
                        }
                        transient_attempts += 1;
                        warn!(url, %status, attempt = transient_attempts, "server error, retrying");
                    } else {
                        // Any other 4xx is permanent: bad key, bad request.
                        let body = resp.text().await.unwrap_or_default();
                        return Err(SyncError::AuthOrRequest(format!(
                            "{} {}: {}",
                            url, status, body
                        )));
                    }
                }
                Err(e) => {
                    if transient_attempts >= self.retry.max_transient_retries {
                        return Err(SyncError::Network(format!(
                            "{} failed after {} retries: {}",
                            url, transient_attempts, e
                        )));
                    }
                    transient_attempts += 1;
                    warn!(url, attempt = transient_attempts, error = %e, "request failed, retrying");
                }
            }

            sleep(with_jitter(backoff)).await;
            backoff = (backoff * 2).min(self.retry.max_backoff);
        }
    }
}

/// Up to +50% random jitter so concurrent sport runs don't retry in lockstep.
fn with_jitter(backoff: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
    backoff + Duration::from_millis(jitter_ms)
}

/// Unwrap the provider envelope into a flat list of record objects.
fn unwrap_envelope(feed: &FeedSpec, url: &str, envelope: Value) -> Result<Vec<Value>> {
    let body = match &envelope {
        Value::Object(map) if map.contains_key("body") => {
            if let Some(code) = map.get("statusCode").and_then(Value::as_i64) {
                if code != 200 {
                    return Err(SyncError::AuthOrRequest(format!(
                        "{} provider statusCode {}: {}",
                        url, code, envelope
                    )));
                }
            }
            map.get("body").cloned().unwrap_or(Value::Null)
        }
        // Some endpoints skip the envelope entirely.
        other => other.clone(),
    };

    match (feed.shape, body) {
        (ResponseShape::BodyArray, Value::Array(rows)) => Ok(rows),
        (ResponseShape::BodyMap, Value::Object(map)) => Ok(map.into_values().collect()),
        // An empty body shows up as "" or null when nothing matched.
        (_, Value::Null) => Ok(Vec::new()),
        (_, Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        (shape, other) => Err(SyncError::AuthOrRequest(format!(
            "{} unexpected body shape (wanted {:?}): {}",
            url,
            shape,
            summarize(&other)
        ))),
    }
}

/// Truncate a serialized body for error messages, on a char boundary.
fn summarize(v: &Value) -> String {
    let s = v.to_string();
    match s.char_indices().nth(200) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s,
    }
}
