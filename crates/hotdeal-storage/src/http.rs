//! Plain HTTP GETs for board list pages and thumbnail images.
//!
//! Requests share one global concurrency cap, a per-board cap and a start
//! spacing. Transient failures (timeouts, connection errors, 429 and 5xx) are
//! retried with doubling pauses; anything else fails immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

use crate::throttle::StartThrottle;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(err) => err.is_timeout() || err.is_connect(),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
                .unwrap_or(false),
        }
    }
}

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total tries, counting the first.
    pub attempts: u32,
    pub first_pause: Duration,
    pub pause_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            first_pause: Duration::from_millis(500),
            pause_cap: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Pause after the `failed`-th failed try (1-based).
    pub fn pause_after(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1).min(16);
        self.first_pause
            .saturating_mul(1 << doublings)
            .min(self.pause_cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub min_spacing: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            min_spacing: Duration::ZERO,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A successful response, fully buffered.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    everyone: Semaphore,
    lanes: Mutex<HashMap<String, Arc<Semaphore>>>,
    lane_width: usize,
    spacing: StartThrottle,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true);
        if let Some(agent) = config.user_agent {
            builder = builder.user_agent(agent);
        }
        Ok(Self {
            client: builder.build().context("building http client")?,
            everyone: Semaphore::new(config.global_concurrency.max(1)),
            lanes: Mutex::new(HashMap::new()),
            lane_width: config.per_source_concurrency.max(1),
            spacing: StartThrottle::new(config.min_spacing),
            backoff: config.backoff,
        })
    }

    async fn lane(&self, source: &str) -> Arc<Semaphore> {
        let mut lanes = self.lanes.lock().await;
        Arc::clone(
            lanes
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.lane_width))),
        )
    }

    /// GET `url` on behalf of `source`, retrying transient failures.
    pub async fn fetch_bytes(&self, source: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _all = self.everyone.acquire().await.expect("semaphore not closed");
        let lane = self.lane(source).await;
        let _mine = lane.acquire().await.expect("semaphore not closed");

        async {
            let mut failed = 0;
            loop {
                self.spacing.wait_turn().await;
                let err = match self.get_once(url).await {
                    Ok(response) => return Ok(response),
                    Err(err) => err,
                };
                failed += 1;
                if !err.is_transient() || failed >= self.backoff.attempts {
                    return Err(err);
                }
                debug!(error = %err, failed, "transient fetch failure, retrying");
                tokio::time::sleep(self.backoff.pause_after(failed)).await;
            }
        }
        .instrument(info_span!("http_get", source, url))
        .await
    }

    async fn get_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();
        Ok(FetchedResponse {
            final_url,
            content_type,
            body,
        })
    }
}
