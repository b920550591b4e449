//! Foundation module - Shared domain primitives.
//!
//! Contains the identifiers, timestamps and event traits that every other
//! layer of the bus builds on.

mod events;
mod timestamp;

pub use events::{EventData, EventId, IntegrationEvent};
pub use timestamp::Timestamp;
