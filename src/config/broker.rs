//! Broker connection configuration

use secrecy::SecretString;
use serde::Deserialize;

use super::error::ValidationError;
use crate::ports::ConnectionSettings;

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    #[serde(default = "default_username")]
    pub username: String,

    /// Login password
    #[serde(default = "default_password")]
    pub password: SecretString,

    /// Virtual host
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
}

impl BrokerConfig {
    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the transport
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            virtual_host: self.virtual_host.clone(),
        }
    }

    /// Validate broker configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::MissingRequired("BROKER_HOST"));
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.username.is_empty() {
            return Err(ValidationError::MissingRequired("BROKER_USERNAME"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            virtual_host: default_virtual_host(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_password() -> SecretString {
    SecretString::new("guest".to_string())
}

fn default_virtual_host() -> String {
    "/".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5672);
        assert_eq!(config.username, "guest");
        assert_eq!(config.password.expose_secret(), "guest");
        assert_eq!(config.virtual_host, "/");
    }

    #[test]
    fn test_settings_copy_every_field() {
        let config = BrokerConfig {
            host: "rabbitmq".to_string(),
            port: 5673,
            username: "orders".to_string(),
            password: SecretString::new("s3cret".to_string()),
            virtual_host: "shop".to_string(),
        };

        let settings = config.settings();

        assert_eq!(settings.endpoint(), "rabbitmq:5673");
        assert_eq!(settings.username, "orders");
        assert_eq!(settings.password(), "s3cret");
        assert_eq!(settings.virtual_host, "shop");
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let config = BrokerConfig {
            password: SecretString::new("s3cret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_validation_empty_host() {
        let config = BrokerConfig {
            host: String::new(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("BROKER_HOST"))
        );
    }

    #[test]
    fn test_validation_zero_port() {
        let config = BrokerConfig {
            port: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));
    }

    #[test]
    fn test_validation_empty_username() {
        let config = BrokerConfig {
            username: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_defaults_are_valid() {
        assert!(BrokerConfig::default().validate().is_ok());
    }
}
