// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridScope.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Retry-aware readings API client.
//!
//! A fetch either returns the parsed data points or a [`FetchFailure`]; it
//! never unwinds for recoverable outcomes. Exhausting the retries is a
//! failure the caller records, not a crash.

use crate::error::{ExtractError, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff schedule for recoverable HTTP outcomes.
///
/// Rate limiting backs off more aggressively (powers of 3) than server
/// errors and transport failures (powers of 2); both are capped at
/// `max_wait`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn rate_limit_wait(&self, attempt: u32) -> Duration {
        self.base_wait.saturating_mul(3u32.saturating_pow(attempt)).min(self.max_wait)
    }

    fn server_error_wait(&self, attempt: u32) -> Duration {
        self.base_wait.saturating_mul(2u32.saturating_pow(attempt)).min(self.max_wait)
    }

    fn transport_wait(&self, attempt: u32) -> Duration {
        self.base_wait.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Terminal outcome of a fetch that produced no data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("401 unauthorized, check the API token and permissions")]
    Unauthorized,

    #[error("response payload is missing the values array")]
    MalformedPayload,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("all retry attempts failed")]
    RetriesExhausted,
}

/// One raw data point from the readings API.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingPoint {
    pub ts: String,
    pub v: f64,
}

/// Query parameters for a single readings fetch.
#[derive(Debug, Clone)]
pub struct ReadingsQuery {
    pub device_id: i64,
    pub parameter_key: String,
    pub resolution: &'static str,
    pub from: String,
    pub to: String,
}

/// HTTP client for the readings endpoint.
#[derive(Debug, Clone)]
pub struct ReadingsClient {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl ReadingsClient {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExtractError::ClientSetup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
            policy,
        })
    }

    /// Fetch readings for one device/parameter over the configured window.
    pub async fn fetch_readings(
        &self,
        token: &str,
        query: &ReadingsQuery,
    ) -> std::result::Result<Vec<ReadingPoint>, FetchFailure> {
        let url = format!("{}/readings", self.base_url);
        let params = [
            ("device_id", query.device_id.to_string()),
            ("operation", "DELTA".to_string()),
            ("parameter_key", query.parameter_key.clone()),
            ("resolution", query.resolution.to_string()),
            ("from", query.from.clone()),
            ("to", query.to.clone()),
        ];

        self.run_with_retry(query.device_id, || {
            self.client
                .get(&url)
                .header("x-dexcell-token", token)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .query(&params)
                .send()
        })
        .await
    }

    /// Retry loop shared by all fetches. `send` issues one request attempt;
    /// the loop owns the backoff and the classification of outcomes.
    async fn run_with_retry<F, Fut>(
        &self,
        device_id: i64,
        mut send: F,
    ) -> std::result::Result<Vec<ReadingPoint>, FetchFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        for attempt in 0..self.policy.max_retries {
            debug!(
                "Attempt {}/{} for device {}",
                attempt + 1,
                self.policy.max_retries,
                device_id
            );

            let response = match send().await {
                Ok(response) => response,
                Err(e) => {
                    if e.is_timeout() {
                        warn!(
                            "Request timeout for device {} (attempt {}/{})",
                            device_id,
                            attempt + 1,
                            self.policy.max_retries
                        );
                    } else {
                        error!("Request failed for device {}: {}", device_id, e);
                    }
                    if attempt + 1 < self.policy.max_retries {
                        tokio::time::sleep(self.policy.transport_wait(attempt)).await;
                    }
                    continue;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    return parse_payload(response, device_id).await;
                }
                StatusCode::UNAUTHORIZED => {
                    let body = response.text().await.unwrap_or_default();
                    error!("401 Unauthorized for device {}: {}", device_id, body);
                    error!("Check your API token and permissions");
                    return Err(FetchFailure::Unauthorized);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = self.policy.rate_limit_wait(attempt);
                    warn!(
                        "Rate limited for device {}. Waiting {:?}...",
                        device_id, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                status if matches!(status.as_u16(), 500 | 502 | 503 | 504) => {
                    let wait = self.policy.server_error_wait(attempt);
                    warn!(
                        "Server error {} for device {}. Retrying in {:?}...",
                        status, device_id, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    error!("HTTP {} for device {}: {}", status, device_id, body);
                    return Err(FetchFailure::Status(status.as_u16()));
                }
            }
        }

        error!("All retry attempts failed for device {}", device_id);
        Err(FetchFailure::RetriesExhausted)
    }
}

/// Parse a 200 response body. The payload must carry a `values` array;
/// individual records missing `ts` or `v` are skipped, not fatal.
async fn parse_payload(
    response: reqwest::Response,
    device_id: i64,
) -> std::result::Result<Vec<ReadingPoint>, FetchFailure> {
    let data: Value = match response.json().await {
        Ok(data) => data,
        Err(e) => {
            error!("Invalid response body for device {}: {}", device_id, e);
            return Err(FetchFailure::MalformedPayload);
        }
    };

    let Some(values) = data.get("values").and_then(Value::as_array) else {
        error!("Invalid response structure for device {}", device_id);
        return Err(FetchFailure::MalformedPayload);
    };

    let mut points = Vec::with_capacity(values.len());
    for item in values {
        let ts = item.get("ts").and_then(Value::as_str);
        let v = item.get("v").and_then(Value::as_f64);
        match (ts, v) {
            (Some(ts), Some(v)) => points.push(ReadingPoint {
                ts: ts.to_string(),
                v,
            }),
            _ => {
                warn!("Skipping invalid data point for device {}", device_id);
            }
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_wait: Duration::from_millis(50),
            max_wait: Duration::from_millis(400),
        }
    }

    fn sample_query() -> ReadingsQuery {
        ReadingsQuery {
            device_id: 101,
            parameter_key: "EACTIVE".to_string(),
            resolution: "H",
            from: "2024-03-01T00:00:00Z".to_string(),
            to: "2024-03-02T00:00:00Z".to_string(),
        }
    }

    fn http_response(status: u16, body: &'static str) -> reqwest::Response {
        reqwest::Response::from(
            http::Response::builder()
                .status(status)
                .body(body)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rate_limited_then_success_sleeps_before_retry() {
        let client = ReadingsClient::new("http://unused", fast_policy()).unwrap();
        let mut calls = 0u32;

        let started = Instant::now();
        let result = client
            .run_with_retry(101, || {
                calls += 1;
                let response = if calls == 1 {
                    http_response(429, "")
                } else {
                    http_response(200, r#"{"values": [{"ts": "2024-03-01T10:00:00Z", "v": 1.5}]}"#)
                };
                async move { Ok(response) }
            })
            .await;
        let elapsed = started.elapsed();

        let points = result.unwrap();
        assert_eq!(calls, 2);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].v, 1.5);
        // First rate-limit backoff is base_wait * 3^0.
        assert!(elapsed >= Duration::from_millis(50), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn test_unauthorized_fails_after_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::UrlEncoded(
                "device_id".into(),
                "101".into(),
            ))
            .with_status(401)
            .with_body("bad token")
            .expect(1)
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let result = client.fetch_readings("tok", &sample_query()).await;

        assert_eq!(result, Err(FetchFailure::Unauthorized));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_retry_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let result = client.fetch_readings("tok", &sample_query()).await;

        assert_eq!(result, Err(FetchFailure::RetriesExhausted));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unexpected_status_does_not_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let result = client.fetch_readings("tok", &sample_query()).await;

        assert_eq!(result, Err(FetchFailure::Status(404)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_payload_without_values_key_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"readings": []}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let result = client.fetch_readings("tok", &sample_query()).await;

        assert_eq!(result, Err(FetchFailure::MalformedPayload));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "values": [
                        {"ts": "2024-03-01T10:00:00Z", "v": 2.0},
                        {"ts": "2024-03-01T11:00:00Z"},
                        {"v": 3.0},
                        {"ts": "2024-03-01T12:00:00Z", "v": -1.25}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let points = client.fetch_readings("tok", &sample_query()).await.unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].v, 2.0);
        assert_eq!(points[1].v, -1.25);
    }

    #[tokio::test]
    async fn test_token_header_and_query_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/readings")
            .match_header("x-dexcell-token", "secret-token")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("operation".into(), "DELTA".into()),
                mockito::Matcher::UrlEncoded("resolution".into(), "H".into()),
                mockito::Matcher::UrlEncoded("parameter_key".into(), "EACTIVE".into()),
            ]))
            .with_status(200)
            .with_body(json!({"values": []}).to_string())
            .create_async()
            .await;

        let client = ReadingsClient::new(server.url(), fast_policy()).unwrap();
        let points = client
            .fetch_readings("secret-token", &sample_query())
            .await
            .unwrap();

        assert!(points.is_empty());
        mock.assert_async().await;
    }
}
