//! HTTP client for the reputation service, with retry and rate-limit
//! handling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::{HTTP_TIMEOUT, MAX_RETRIES, RETRY_DELAY};
use crate::progress::LogSink;
use crate::reputation::ReputationRecord;

/// Error returned when a reputation lookup gives up.
///
/// A 404 is deliberately *not* represented here; it maps to
/// [`ReputationRecord::not_found`] on the success path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Every attempt failed (rate limiting, transport errors, or unexpected
    /// status codes).
    #[error("lookup for {ip} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The IP that was being looked up.
        ip: String,
        /// Number of attempts made.
        attempts: usize,
        /// Description of the final failure.
        last_error: String,
    },
}

/// The lookup seam the scan coordinator depends on.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    /// Fetches the normalized reputation verdict for one IP address.
    async fn query(&self, ip: &str, log: &LogSink) -> Result<ReputationRecord, QueryError>;
}

/// Client for the VirusTotal IP address endpoint.
pub struct VirusTotalClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl VirusTotalClient {
    /// Builds a client with the default retry policy and request timeout.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::ClientBuilder::new().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Overrides the retry ceiling and inter-attempt delay.
    pub fn with_retry_policy(mut self, max_retries: usize, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn attempt(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
    }
}

#[async_trait]
impl ReputationLookup for VirusTotalClient {
    async fn query(&self, ip: &str, log: &LogSink) -> Result<ReputationRecord, QueryError> {
        let url = format!("{}/{}", self.base_url, ip);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_retries {
            log.emit(&format!(
                "Checking reputation for {ip} (attempt {attempt}/{})",
                self.max_retries
            ));

            match self.attempt(&url).await {
                Ok(response) => match response.status() {
                    StatusCode::OK => match response.json::<Value>().await {
                        Ok(body) => {
                            let attrs = body
                                .pointer("/data/attributes")
                                .cloned()
                                .unwrap_or(Value::Null);
                            return Ok(ReputationRecord::from_attributes(&attrs));
                        }
                        Err(e) => {
                            log.emit(&format!("Unreadable response body for {ip}: {e}"));
                            last_error = format!("unreadable response body: {e}");
                        }
                    },
                    StatusCode::NOT_FOUND => {
                        log.emit(&format!("IP {ip} not found in the reputation database"));
                        return Ok(ReputationRecord::not_found());
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        log.emit(&format!("Rate limit hit for {ip}, waiting before retry"));
                        last_error = "rate limited (HTTP 429)".to_string();
                    }
                    status => {
                        log.emit(&format!("Error for {ip}: HTTP {status}"));
                        last_error = format!("unexpected status {status}");
                    }
                },
                Err(e) => {
                    log.emit(&format!("Network error for {ip}: {e}"));
                    last_error = format!("network error: {e}");
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        log.emit(&format!(
            "Giving up on {ip} after {} attempts",
            self.max_retries
        ));
        Err(QueryError::RetriesExhausted {
            ip: ip.to_string(),
            attempts: self.max_retries,
            last_error,
        })
    }
}
