//! Domain layer containing the event model and subscription rules.
//!
//! # Module Organization
//!
//! - `foundation` - Event identity, timestamps and the `IntegrationEvent` trait
//! - `subscriptions` - Subscription records, handler contracts, dispatch errors
//! - `retry` - Exponential backoff policy

pub mod foundation;
pub mod retry;
pub mod subscriptions;
