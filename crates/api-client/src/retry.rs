use configuration::ApiSettings;
use std::time::Duration;

/// Bounded exponential wait between attempts of the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self {
            max_retries: settings.retry_attempts,
            base_wait: settings.retry_wait(),
            max_wait: settings.retry_max_wait(),
        }
    }

    /// Wait before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_wait.saturating_mul(factor).min(self.max_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(4, 10)]
    #[case(40, 10)]
    fn backoff_doubles_up_to_the_cap(#[case] retry: u32, #[case] secs: u64) {
        assert_eq!(RetryPolicy::default().backoff(retry), Duration::from_secs(secs));
    }
}
