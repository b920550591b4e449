//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the bus and the outside world. Adapters implement these ports.
//!
//! - `Transport` / `BrokerConnection` / `BrokerChannel` - Message broker access
//! - `DeliveryHandler` - Receives consumed messages
//! - `SubscriptionRegistry` - Event name to subscription mapping
//! - `HandlerResolver` / `ResolutionScope` - Per-message handler instances

mod handler_resolver;
mod subscription_registry;
mod transport;

pub use handler_resolver::{HandlerResolver, ResolutionScope};
pub use subscription_registry::{event_name_of, EventRemoved, SubscriptionRegistry};
pub use transport::{
    BrokerChannel, BrokerConnection, ChannelError, ConnectionSettings, ConnectionSignal,
    Delivery, DeliveryHandler, ExchangeKind, PublishProperties, Transport, TransportError,
};
