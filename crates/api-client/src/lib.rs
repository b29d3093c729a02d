use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::Endpoint;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod client;
pub mod error;
pub mod lenient;
pub mod limiter;
pub mod responses;
pub mod retry;

// --- Public API ---
pub use client::SleeperClient;
pub use error::{FetchError, ValidationError};
pub use limiter::RateLimiter;
pub use responses::{
    DraftPick, League, Matchup, NflState, Player, Roster, RosterSettings, TradedPick, Transaction,
    User,
};
pub use retry::RetryPolicy;

/// The read-only interface to the upstream API.
///
/// Implementations return the raw bytes untouched; decoding happens later at
/// the normalization boundary via [`decode`]. The orchestrator only depends on
/// this trait so tests can script responses.
#[async_trait]
pub trait SleeperApi: Send + Sync {
    async fn fetch(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Payload, FetchError>;
}

/// An undecoded response body together with its fetch metadata.
#[derive(Debug, Clone)]
pub struct Payload {
    pub endpoint: Endpoint,
    pub body: Vec<u8>,
    pub status: u16,
    pub latency: Duration,
    pub fetched_at: DateTime<Utc>,
}

impl Payload {
    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn latency_ms(&self) -> i64 {
        i64::try_from(self.latency.as_millis()).unwrap_or(i64::MAX)
    }

    /// `true` for `[]`, `{}` and `null` bodies, which the API returns for
    /// weeks that have not been played yet.
    pub fn is_empty_collection(&self) -> bool {
        is_empty_collection(&self.body)
    }
}

pub fn is_empty_collection(body: &[u8]) -> bool {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Null) => true,
        Ok(serde_json::Value::Array(items)) => items.is_empty(),
        Ok(serde_json::Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

/// Decodes a payload body, reporting failures against the endpoint they came from.
pub fn decode<T: DeserializeOwned>(endpoint: &Endpoint, body: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::new(endpoint, e))
}
