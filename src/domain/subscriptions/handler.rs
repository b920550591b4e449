//! Handler contracts for typed and dynamic subscriptions.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::error::Error as StdError;
use thiserror::Error;

use crate::domain::foundation::IntegrationEvent;

/// Error returned by an event handler.
///
/// The bus logs it together with the offending message and carries on with
/// the next handler; it never reaches the publisher.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Handler for a typed subscription.
///
/// Receives the message body deserialized into `E`.
///
/// # Example
///
/// ```ignore
/// struct SendWelcomeMail { mailer: Arc<Mailer> }
///
/// #[async_trait]
/// impl EventHandler<UserRegistered> for SendWelcomeMail {
///     async fn handle(&self, event: UserRegistered) -> Result<(), HandlerError> {
///         self.mailer.welcome(&event.email).await.map_err(|e| HandlerError::with_source("mail", e))
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler<E: IntegrationEvent>: Send + Sync + 'static {
    /// Process one event.
    async fn handle(&self, event: E) -> Result<(), HandlerError>;
}

/// Handler for a dynamic (schema-less) subscription.
///
/// Receives the message body parsed into a JSON value. The value is parsed
/// once per message and shared by every dynamic handler of that message.
#[async_trait]
pub trait DynamicEventHandler: Send + Sync + 'static {
    /// Process one event body.
    async fn handle(&self, event: &JsonValue) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn handler_error_displays_message() {
        let err = HandlerError::new("inventory service rejected the order");
        assert_eq!(err.to_string(), "inventory service rejected the order");
        assert!(err.source().is_none());
    }

    #[test]
    fn handler_error_keeps_source() {
        let cause = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let err = HandlerError::with_source("mail delivery failed", cause);

        assert_eq!(err.message(), "mail delivery failed");
        assert_eq!(err.source().unwrap().to_string(), "timed out");
    }

    // Compile-time check that the dynamic handler trait is object-safe
    #[allow(dead_code)]
    fn assert_dynamic_handler_object_safe(_: &dyn DynamicEventHandler) {}
}
