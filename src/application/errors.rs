//! Errors surfaced by the connection and the bus.

use thiserror::Error;

use crate::domain::subscriptions::SubscriptionError;
use crate::ports::TransportError;

/// Errors from [`PersistentConnection`](super::PersistentConnection).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("No broker connection is available")]
    NotConnected,

    #[error("Connection has been disposed")]
    Disposed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors returned to callers of [`EventBus`](super::EventBus).
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("No broker connection is available")]
    NotConnected,

    #[error("Event bus has been disposed")]
    Disposed,

    #[error("Broker connection has been disposed")]
    ConnectionDisposed,

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl From<ConnectionError> for EventBusError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotConnected => EventBusError::NotConnected,
            ConnectionError::Disposed => EventBusError::ConnectionDisposed,
            ConnectionError::Transport(e) => EventBusError::Transport(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_map_onto_bus_errors() {
        assert!(matches!(
            EventBusError::from(ConnectionError::NotConnected),
            EventBusError::NotConnected
        ));
        assert!(matches!(
            EventBusError::from(ConnectionError::Disposed),
            EventBusError::ConnectionDisposed
        ));
        assert!(matches!(
            EventBusError::from(ConnectionError::Transport(TransportError::ChannelClosed)),
            EventBusError::Transport(TransportError::ChannelClosed)
        ));
    }

    #[test]
    fn transport_errors_display_transparently() {
        let err = EventBusError::from(TransportError::Io("connection reset".into()));
        assert_eq!(err.to_string(), "Transport I/O error: connection reset");
    }
}
