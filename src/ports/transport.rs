//! Transport port - Interface to the message broker.
//!
//! The bus never speaks a wire protocol itself. It drives a broker through
//! three collaborators:
//!
//! - [`Transport`] - opens connections
//! - [`BrokerConnection`] - a live connection that hands out channels and
//!   reports shutdown, callback errors and flow-control blocks
//! - [`BrokerChannel`] - declares topology, publishes and consumes
//!
//! Consumption uses manual acknowledgement: the broker pushes each message to
//! a [`DeliveryHandler`], and the handler's owner acks the delivery tag.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Errors reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// Socket or other I/O failure on an established link.
    #[error("Transport I/O error: {0}")]
    Io(String),

    /// Referenced exchange or queue does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The channel was closed before or during the operation.
    #[error("Channel closed")]
    ChannelClosed,

    /// Broker rejected the operation.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Io(_))
    }
}

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub virtual_host: String,
}

impl ConnectionSettings {
    /// `host:port`, for logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Exposes the password to the transport.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: SecretString::new("guest".to_string()),
            virtual_host: "/".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("virtual_host", &self.virtual_host)
            .finish()
    }
}

/// Connection-level events that require a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The broker or network closed the connection.
    Shutdown(String),
    /// A connection callback raised an error.
    CallbackError(String),
    /// The broker blocked the connection (flow control).
    Blocked(String),
}

/// Channel-level callback error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    pub reason: String,
}

/// Exchange routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
}

/// Per-message publish properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishProperties {
    /// Message survives a broker restart.
    pub persistent: bool,
}

/// A message pushed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub delivery_tag: u64,
}

/// Opens broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn BrokerConnection>, TransportError>;
}

/// An established broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// True until the connection is closed by either side.
    fn is_open(&self) -> bool;

    /// Closes the connection.
    async fn close(&self) -> Result<(), TransportError>;

    /// Stream of shutdown/error/blocked signals for this connection.
    ///
    /// Each call returns a new receiver.
    fn signals(&self) -> UnboundedReceiver<ConnectionSignal>;

    /// Opens a channel on this connection.
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;
}

/// A lightweight session on a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange. Idempotent.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind)
        -> Result<(), TransportError>;

    /// Declares a queue and returns its name.
    ///
    /// An empty name asks the broker to generate one.
    async fn declare_queue(&self, name: &str) -> Result<String, TransportError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: PublishProperties,
        body: &[u8],
    ) -> Result<(), TransportError>;

    /// Starts pushing messages from `queue` to `handler`. Returns the
    /// consumer tag. Deliveries stay unacknowledged until [`ack`](Self::ack).
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String, TransportError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    /// Stream of callback errors raised on this channel.
    fn errors(&self) -> UnboundedReceiver<ChannelError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Receives messages pushed by a consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivery(&self, delivery: Delivery);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_and_io_are_transient() {
        assert!(TransportError::Unreachable("refused".into()).is_transient());
        assert!(TransportError::Io("reset".into()).is_transient());
    }

    #[test]
    fn other_errors_are_not_transient() {
        assert!(!TransportError::NotFound("queue".into()).is_transient());
        assert!(!TransportError::ChannelClosed.is_transient());
        assert!(!TransportError::Protocol("access refused".into()).is_transient());
    }

    #[test]
    fn settings_debug_redacts_password() {
        let settings = ConnectionSettings {
            password: SecretString::new("hunter2".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", settings);

        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(settings.password(), "hunter2");
    }

    #[test]
    fn endpoint_joins_host_and_port() {
        let settings = ConnectionSettings {
            host: "broker.internal".to_string(),
            port: 5673,
            ..Default::default()
        };
        assert_eq!(settings.endpoint(), "broker.internal:5673");
    }

    // Compile-time check that traits are object-safe
    #[allow(dead_code)]
    fn assert_transport_object_safe(_: &dyn Transport) {}

    #[allow(dead_code)]
    fn assert_connection_object_safe(_: &dyn BrokerConnection) {}

    #[allow(dead_code)]
    fn assert_channel_object_safe(_: &dyn BrokerChannel) {}

    #[allow(dead_code)]
    fn assert_delivery_handler_object_safe(_: &dyn DeliveryHandler) {}
}
