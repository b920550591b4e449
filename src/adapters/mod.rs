//! Adapters - Implementations of port interfaces.
//!
//! - `broker` - Message broker transports (in-memory)
//! - `registry` - Subscription registries (in-memory)
//! - `resolver` - Handler resolvers (factory based)

pub mod broker;
pub mod registry;
pub mod resolver;

pub use broker::{InMemoryBroker, PublishedMessage};
pub use registry::InMemorySubscriptionRegistry;
pub use resolver::FactoryResolver;
