//! Integration Event Bus - Typed publish/subscribe over a message broker
//!
//! This crate lets components publish integration events by type and
//! subscribe handlers to them without knowing about each other, while
//! surviving broker outages through a self-healing connection.
//!
//! # Layers
//!
//! - `domain` - Event model, subscriptions, retry policy
//! - `ports` - Broker transport, subscription registry, handler resolution
//! - `adapters` - In-memory broker, registry and factory resolver
//! - `application` - `PersistentConnection` and `EventBus`
//! - `config` - Environment-driven configuration
//! - `telemetry` - Tracing subscriber setup

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

pub use application::{
    BusSettings, ConnectionError, ConnectionState, DispatchSummary, EventBus, EventBusError,
    PersistentConnection,
};
pub use domain::foundation::{EventData, EventId, IntegrationEvent, Timestamp};
pub use domain::retry::RetryPolicy;
pub use domain::subscriptions::{DynamicEventHandler, EventHandler, HandlerError};
