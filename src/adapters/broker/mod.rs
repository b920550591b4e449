//! Broker adapters.
//!
//! - `InMemoryBroker` - Single-process broker with fault injection

mod in_memory;

pub use in_memory::{InMemoryBroker, PublishedMessage};
