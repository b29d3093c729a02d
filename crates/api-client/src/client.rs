use crate::error::FetchError;
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::{Payload, SleeperApi};
use async_trait::async_trait;
use chrono::Utc;
use configuration::ApiSettings;
use core_types::Endpoint;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error bodies are kept for diagnostics but truncated to this many bytes.
const MAX_ERROR_BODY: usize = 512;

/// The HTTP implementation of [`SleeperApi`].
#[derive(Clone)]
pub struct SleeperClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl SleeperClient {
    pub fn new(settings: &ApiSettings, limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            limiter,
            policy: RetryPolicy::from_settings(settings),
            timeout: settings.timeout(),
        })
    }

    /// One rate-limited, time-bounded request. Returns the status and body of a 2xx response.
    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<(u16, Vec<u8>), FetchError> {
        self.limiter.acquire(cancel).await?;

        let request = async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, request) => outcome,
        };

        match outcome {
            Err(_) => Err(FetchError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_timeout() => Err(FetchError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(FetchError::Network(e.to_string())),
            Ok(Ok((status, body))) if status.is_success() => Ok((status.as_u16(), body.to_vec())),
            Ok(Ok((status, body))) => {
                let mut text = String::from_utf8_lossy(&body).into_owned();
                if text.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                Err(FetchError::Status { status: status.as_u16(), body: text })
            }
        }
    }
}

#[async_trait]
impl SleeperApi for SleeperClient {
    async fn fetch(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Payload, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let url = format!("{}{}", self.base_url, endpoint.path());
        let started = Instant::now();
        let mut retries = 0;

        loop {
            match self.attempt(&url, cancel).await {
                Ok((status, body)) => {
                    let latency = started.elapsed();
                    tracing::debug!(
                        endpoint = %endpoint,
                        status,
                        bytes = body.len(),
                        latency_ms = latency.as_millis() as u64,
                        "Fetched endpoint."
                    );
                    return Ok(Payload {
                        endpoint: endpoint.clone(),
                        body,
                        status,
                        latency,
                        fetched_at: Utc::now(),
                    });
                }
                Err(err) if err.is_retryable() && retries < self.policy.max_retries => {
                    let wait = self.policy.backoff(retries);
                    retries += 1;
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt = retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying."
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(err) if err.is_retryable() && self.policy.max_retries > 0 => {
                    tracing::error!(endpoint = %endpoint, attempts = retries + 1, error = %err, "Retries exhausted.");
                    return Err(FetchError::RetriesExhausted { attempts: retries + 1, last: Box::new(err) });
                }
                Err(err) => {
                    tracing::error!(endpoint = %endpoint, error = %err, "Request failed.");
                    return Err(err);
                }
            }
        }
    }
}
