use crate::error::FetchError;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A token bucket shared by every caller of the upstream API.
///
/// Construct once and hand out clones of an `Arc<RateLimiter>`; each request
/// takes one token, and tokens refill continuously at `rate` per second up to
/// `burst`.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    pub fn new(rate_per_second: u32, burst: u32) -> Self {
        let rate = f64::from(rate_per_second.max(1));
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket { tokens: burst, refilled_at: Instant::now() }),
        }
    }

    /// Waits for a token. Returns `FetchError::Cancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        loop {
            let wait = match self.try_take().await {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Takes a token if one is available, otherwise reports how long until one is.
    async fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate_then_requests_are_paced() {
        let limiter = RateLimiter::new(10, 2);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(190), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(260), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_budget() {
        let limiter = Arc::new(RateLimiter::new(10, 1));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { limiter.acquire(&cancel).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(390));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_is_cancellable() {
        let limiter = RateLimiter::new(1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waiter.cancel();
        });
        assert!(matches!(limiter.acquire(&cancel).await, Err(FetchError::Cancelled)));
    }
}
