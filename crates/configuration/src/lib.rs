use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    ApiSettings, AppConfig, DatabaseSettings, LoggingSettings, ScheduleSettings, SyncSettings,
};

/// Environment variables override file values, e.g. `SLEEPER_API__RATE_LIMIT_PER_SECOND=5`.
pub const ENV_PREFIX: &str = "SLEEPER";

/// Loads and validates the application configuration.
///
/// Values come from the built-in defaults, then the optional TOML file at
/// `path` (default `config.toml`), then `SLEEPER_*` environment variables.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path.unwrap_or("config.toml")).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;

    Ok(config)
}
