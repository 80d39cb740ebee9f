//! HTTP layer with rate limiting, per-call timeouts, and retry with
//! exponential backoff.

use backfill_core::{ErrorKind, FetcherConfig, Result, Shutdown};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::rate_limiter::RateLimiter;

/// Statuses retried with backoff. 429 is handled separately.
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Longest response body excerpt kept in a client error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Counters kept across every call made through one fetcher.
#[derive(Debug, Default)]
pub struct FetchStats {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
}

impl FetchStats {
    #[must_use]
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Delay before retry number `attempt + 1`.
///
/// `base × 2^attempt`, capped at the configured maximum, jittered uniformly
/// in `[0, delay]` when enabled. A `Retry-After` value is a floor.
#[must_use]
pub fn backoff_delay(config: &FetcherConfig, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(config.max_delay_ms);

    let jittered = if config.jitter && capped > 0 {
        rand::thread_rng().gen_range(0..=capped)
    } else {
        capped
    };

    let floor = retry_after_secs.unwrap_or(0).saturating_mul(1_000);
    Duration::from_millis(jittered.max(floor))
}

/// Rate-limited, retrying HTTP client bound to one source.
#[derive(Debug)]
pub struct ResilientFetcher {
    http: Client,
    config: FetcherConfig,
    limiter: Arc<RateLimiter>,
    shutdown: Shutdown,
    stats: FetchStats,
}

impl ResilientFetcher {
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(config: FetcherConfig, limiter: Arc<RateLimiter>, shutdown: Shutdown) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("backfill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ErrorKind::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            limiter,
            shutdown,
            stats: FetchStats::default(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        self.limiter.source_id()
    }

    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Executes `request` and decodes the body as JSON.
    ///
    /// # Errors
    /// See [`fetch_bytes`](Self::fetch_bytes); an undecodable body is
    /// `MalformedRecord`.
    pub async fn fetch_json(&self, request: &Request) -> Result<Value> {
        let body = self.fetch_bytes(request).await?;
        serde_json::from_slice(&body).map_err(|e| {
            ErrorKind::malformed(format!("invalid JSON from {}: {e}", request.url))
        })
    }

    /// Executes `request` and returns the raw body.
    ///
    /// # Errors
    /// - `ClientError` for a 4xx other than 429
    /// - `Exhausted` once retryable failures outlast the retry budget
    /// - `Cancelled` if shutdown fires while waiting
    pub async fn fetch_bytes(&self, request: &Request) -> Result<Vec<u8>> {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_triggered() {
                return Err(ErrorKind::Cancelled);
            }

            tokio::select! {
                () = self.shutdown.wait() => return Err(ErrorKind::Cancelled),
                () = self.limiter.acquire() => {}
            }

            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            debug!(
                source = %self.source_id(),
                url = %request.url,
                attempt = attempt + 1,
                "Sending request"
            );

            let outcome = tokio::select! {
                () = self.shutdown.wait() => return Err(ErrorKind::Cancelled),
                outcome = self.attempt(request) => outcome,
            };

            let err = match outcome {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            if !err.is_retryable() {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %self.source_id(),
                    url = %request.url,
                    attempts = attempt + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(ErrorKind::Exhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }

            let retry_after = match &err {
                ErrorKind::RateLimitExceeded { retry_after_secs } => *retry_after_secs,
                _ => None,
            };
            let delay = backoff_delay(&self.config, attempt, retry_after);
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                source = %self.source_id(),
                url = %request.url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, backing off"
            );

            tokio::select! {
                () = self.shutdown.wait() => return Err(ErrorKind::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(&self, request: &Request) -> Result<Vec<u8>> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        }
        .timeout(self.config.timeout());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(ErrorKind::RateLimitExceeded { retry_after_secs });
        }

        if RETRYABLE_STATUSES.contains(&status.as_u16()) {
            return Err(ErrorKind::TransientNetwork(format!("HTTP {status}")));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(ErrorKind::client(status.as_u16(), message));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::TransientNetwork(format!("timeout: {err}"))
    } else {
        ErrorKind::TransientNetwork(err.to_string())
    }
}
