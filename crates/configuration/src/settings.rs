use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub database: DatabaseSettings,
    pub sync: SyncSettings,
    pub schedule: ScheduleSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Rejects values that would make the pipeline unusable at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.api.base_url.trim().is_empty() {
            return fail("api.base_url must not be empty");
        }
        if self.api.rate_limit_per_second == 0 || self.api.burst == 0 {
            return fail("api.rate_limit_per_second and api.burst must be positive");
        }
        if self.api.timeout_secs == 0 {
            return fail("api.timeout_secs must be positive");
        }
        if self.database.max_connections == 0 {
            return fail("database.max_connections must be positive");
        }
        if self.sync.primary_league_id.trim().is_empty() {
            return fail("sync.primary_league_id is required");
        }
        if self.sync.etl_commit_group_size == 0 {
            return fail("sync.etl_commit_group_size must be positive");
        }
        if self.sync.etl_stale_claim_secs == 0 {
            return fail("sync.etl_stale_claim_secs must be positive");
        }
        if self.schedule.etl_interval_secs == 0 {
            return fail("schedule.etl_interval_secs must be positive");
        }
        Ok(())
    }
}

/// Settings for the outbound Sleeper API client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    /// Steady-state token refill rate of the shared limiter.
    pub rate_limit_per_second: u32,
    /// Tokens available at once after an idle period.
    pub burst: u32,
    pub timeout_secs: u64,
    /// Retries after the first attempt; `0` disables retrying.
    pub retry_attempts: u32,
    pub retry_wait_ms: u64,
    pub retry_max_wait_ms: u64,
    pub user_agent: String,
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn retry_max_wait(&self) -> Duration {
        Duration::from_millis(self.retry_max_wait_ms)
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.sleeper.app/v1".to_string(),
            rate_limit_per_second: 10,
            burst: 10,
            timeout_secs: 30,
            retry_attempts: 3,
            retry_wait_ms: 1_000,
            retry_max_wait_ms: 10_000,
            user_agent: concat!("sleeper-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Overrides `DATABASE_URL` when set.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 25,
            min_connections: 5,
            acquire_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// The league the scheduled full sync targets.
    pub primary_league_id: String,
    /// Upper bound of snapshots one ETL pass claims.
    pub etl_batch_size: usize,
    /// Snapshots claimed (and therefore committed) together.
    pub etl_commit_group_size: usize,
    /// A `processing` claim older than this is treated as abandoned and requeued.
    pub etl_stale_claim_secs: u64,
}

impl SyncSettings {
    pub fn etl_stale_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.etl_stale_claim_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            primary_league_id: String::new(),
            etl_batch_size: 100,
            etl_commit_group_size: 25,
            etl_stale_claim_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    /// Cron expression (5 or 6 fields, UTC) for the full league sync.
    pub full_sync_cron: String,
    /// Cron expression for the players refresh; the player catalogue is large
    /// and changes slowly.
    pub players_cron: String,
    pub etl_interval_secs: u64,
}

impl ScheduleSettings {
    pub fn etl_interval(&self) -> Duration {
        Duration::from_secs(self.etl_interval_secs)
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            full_sync_cron: "0 */6 * * *".to_string(),
            players_cron: "30 3 * * *".to_string(),
            etl_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "sleeper-sync.log".to_string(),
        }
    }
}
