//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `EVENT_BUS` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use integration_event_bus::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Broker at {}", config.broker.endpoint());
//! ```

mod broker;
mod bus;
mod error;
mod logging;

pub use broker::BrokerConfig;
pub use bus::{EventBusConfig, MAX_RETRY_COUNT};
pub use error::{ConfigError, ValidationError};
pub use logging::LoggingConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a bus talking
/// to `guest@localhost:5672`. Load using [`AppConfig::load()`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Broker connection (host, port, credentials)
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Exchange, queue and retry settings
    #[serde(default)]
    pub bus: EventBusConfig,

    /// Log filter and format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `EVENT_BUS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `EVENT_BUS__BROKER__HOST=rabbitmq` -> `broker.host = "rabbitmq"`
    /// - `EVENT_BUS__BUS__RETRY_COUNT=8` -> `bus.retry_count = 8`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("EVENT_BUS")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load and validate in one step.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.broker.validate()?;
        self.bus.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "EVENT_BUS__BROKER__HOST",
        "EVENT_BUS__BROKER__PORT",
        "EVENT_BUS__BROKER__PASSWORD",
        "EVENT_BUS__BUS__EXCHANGE_NAME",
        "EVENT_BUS__BUS__QUEUE_NAME",
        "EVENT_BUS__BUS__RETRY_COUNT",
        "EVENT_BUS__LOGGING__JSON",
    ];

    /// Helper to clear environment variables after testing
    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_defaults_from_empty_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let result = AppConfig::load();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.broker.endpoint(), "localhost:5672");
        assert_eq!(config.bus.exchange_name, "event_bus");
        assert_eq!(config.bus.retry_count, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__BROKER__HOST", "rabbitmq");
        env::set_var("EVENT_BUS__BROKER__PORT", "5673");
        env::set_var("EVENT_BUS__BROKER__PASSWORD", "s3cret");
        env::set_var("EVENT_BUS__BUS__EXCHANGE_NAME", "shop_events");
        env::set_var("EVENT_BUS__BUS__QUEUE_NAME", "billing");
        env::set_var("EVENT_BUS__BUS__RETRY_COUNT", "8");
        env::set_var("EVENT_BUS__LOGGING__JSON", "true");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.broker.host, "rabbitmq");
        assert_eq!(config.broker.port, 5673);
        assert_eq!(config.broker.password.expose_secret(), "s3cret");
        assert_eq!(config.bus.exchange_name, "shop_events");
        assert_eq!(config.bus.queue_name, "billing");
        assert_eq!(config.bus.retry_count, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_validated_rejects_bad_retry_count() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__BUS__RETRY_COUNT", "0");
        let result = AppConfig::load_validated();
        clear_env();

        assert!(matches!(
            result,
            Err(ConfigError::ValidationFailed(ValidationError::InvalidRetryCount { .. }))
        ));
    }

    #[test]
    fn test_unparseable_port_is_a_load_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__BROKER__PORT", "not-a-port");
        let result = AppConfig::load();
        clear_env();

        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
