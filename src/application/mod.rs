//! Application layer - Connection management and the event bus.
//!
//! Orchestrates the domain types over the ports:
//! - `PersistentConnection` - Single-flight, self-healing broker connection
//! - `EventBus` - Publish, subscribe and consume
//! - `Dispatcher` - Per-message routing to subscribed handlers

mod dispatcher;
mod errors;
mod event_bus;
mod persistent_connection;

pub use dispatcher::{DispatchSummary, Dispatcher};
pub use errors::{ConnectionError, EventBusError};
pub use event_bus::{BusSettings, EventBus};
pub use persistent_connection::{ConnectionState, PersistentConnection};
