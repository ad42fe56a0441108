//! HTTP transport with sleep-and-retry on non-200 responses.
//!
//! [`HttpTransport`] performs a single GET with bearer auth and a hard
//! per-call timeout. [`RateLimitedTransport`] wraps any [`Transport`] and,
//! whenever the status is not 200, logs it, sleeps the cooldown, and resends
//! the same request until [`RetryPolicy::max_attempts`] is used up.
//!
//! Timeouts and connection failures are returned straight away. Only a
//! response with a status code counts toward the cooldown path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TwitterError};
use crate::types::{ApiRequest, RawResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";

/// Something that can perform one request and report status + body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport whose every call is bounded by `timeout`.
    pub fn new(bearer_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TwitterError::Http(Box::new(e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: bearer_token.into(),
            timeout,
        })
    }

    /// Point at a different API root (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let url = format!("{}/{}", self.base_url, request.endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&request.params)
            .send()
            .await
            .map_err(|e| self.classify(&request.endpoint, e))?;

        let status = response.status().as_u16();
        debug!(endpoint = %request.endpoint, status, "Endpoint responded");

        let body = response
            .text()
            .await
            .map_err(|e| self.classify(&request.endpoint, e))?;

        Ok(RawResponse { status, body })
    }
}

impl HttpTransport {
    fn classify(&self, endpoint: &str, error: reqwest::Error) -> TwitterError {
        if error.is_timeout() {
            TwitterError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            TwitterError::Http(Box::new(error))
        }
    }
}

/// How many times to try a request and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            cooldown,
        }
    }
}

/// A successful (status 200) exchange plus what it took to get it.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub body: String,
    pub attempts: u32,
    /// Cooldown sleeps taken before the request went through.
    pub cooldowns: u32,
}

/// Wraps a transport with the cooldown-and-retry policy.
pub struct RateLimitedTransport<T: Transport> {
    inner: T,
    policy: RetryPolicy,
    cooldowns: AtomicU32,
}

impl<T: Transport> RateLimitedTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cooldowns: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Total cooldown sleeps taken over this transport's lifetime.
    pub fn cooldowns_taken(&self) -> u32 {
        self.cooldowns.load(Ordering::Relaxed)
    }

    /// Send until a 200 comes back or the attempt bound is hit.
    pub async fn send(&self, request: &ApiRequest) -> Result<Delivered> {
        let mut attempts = 0;
        let mut cooldowns = 0;

        loop {
            attempts += 1;
            let response = self.inner.send(request).await?;

            if response.status == 200 {
                return Ok(Delivered {
                    body: response.body,
                    attempts,
                    cooldowns,
                });
            }

            warn!(
                endpoint = %request.endpoint,
                status = response.status,
                body = %truncate(&response.body, 300),
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                "Non-200 response from endpoint"
            );

            if attempts >= self.policy.max_attempts {
                return Err(TwitterError::RetriesExhausted {
                    status: response.status,
                    body: response.body,
                    attempts,
                });
            }

            warn!(
                cooldown_secs = self.policy.cooldown.as_secs(),
                "Cooling down before retrying the same request"
            );
            tokio::time::sleep(self.policy.cooldown).await;
            cooldowns += 1;
            self.cooldowns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
