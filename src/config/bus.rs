//! Event bus configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::application::BusSettings;
use crate::domain::retry::{RetryPolicy, DEFAULT_RETRY_COUNT};

/// Upper bound for `retry_count`; 2^16 seconds is already over 18 hours.
pub const MAX_RETRY_COUNT: u32 = 16;

/// Event bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    /// Direct exchange events are published to
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,

    /// Consumer queue name; empty lets the broker generate one
    #[serde(default)]
    pub queue_name: String,

    /// Attempts for connecting and publishing
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl EventBusConfig {
    /// Backoff policy for connection and publish retries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count)
    }

    /// Settings for [`EventBus::start`](crate::application::EventBus::start)
    pub fn settings(&self) -> BusSettings {
        BusSettings {
            exchange_name: self.exchange_name.clone(),
            queue_name: self.queue_name.clone(),
            retry: self.retry_policy(),
        }
    }

    /// Validate event bus configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exchange_name.is_empty() {
            return Err(ValidationError::MissingRequired("BUS_EXCHANGE_NAME"));
        }
        if self.retry_count == 0 || self.retry_count > MAX_RETRY_COUNT {
            return Err(ValidationError::InvalidRetryCount {
                actual: self.retry_count,
                max: MAX_RETRY_COUNT,
            });
        }
        Ok(())
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            exchange_name: default_exchange_name(),
            queue_name: String::new(),
            retry_count: default_retry_count(),
        }
    }
}

fn default_exchange_name() -> String {
    "event_bus".to_string()
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_event_bus_config_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.exchange_name, "event_bus");
        assert_eq!(config.queue_name, "");
        assert_eq!(config.retry_count, 5);
    }

    #[test]
    fn test_retry_policy_uses_retry_count() {
        let config = EventBusConfig {
            retry_count: 3,
            ..Default::default()
        };
        let policy = config.retry_policy();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    }

    #[test]
    fn test_settings_carry_names() {
        let config = EventBusConfig {
            exchange_name: "shop".to_string(),
            queue_name: "billing".to_string(),
            retry_count: 2,
        };
        let settings = config.settings();

        assert_eq!(settings.exchange_name, "shop");
        assert_eq!(settings.queue_name, "billing");
        assert_eq!(settings.retry, RetryPolicy::new(2));
    }

    #[test]
    fn test_validation_empty_exchange() {
        let config = EventBusConfig {
            exchange_name: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_retry_count_bounds() {
        for retry_count in [0, MAX_RETRY_COUNT + 1] {
            let config = EventBusConfig {
                retry_count,
                ..Default::default()
            };
            assert_eq!(
                config.validate(),
                Err(ValidationError::InvalidRetryCount {
                    actual: retry_count,
                    max: MAX_RETRY_COUNT
                })
            );
        }

        for retry_count in [1, MAX_RETRY_COUNT] {
            let config = EventBusConfig {
                retry_count,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }
}
