//! Subscriptions - what a consumer has asked to receive.
//!
//! A [`Subscription`] binds a handler type to an event name. Typed
//! subscriptions deserialize the body into a concrete [`IntegrationEvent`];
//! dynamic ones hand the parsed JSON to a [`DynamicEventHandler`].
//!
//! [`IntegrationEvent`]: crate::domain::foundation::IntegrationEvent

mod handler;
mod subscription;

pub use handler::{DynamicEventHandler, EventHandler, HandlerError};
pub use subscription::{
    DispatchError, HandlerInstance, HandlerType, Payload, PayloadType, Subscription,
    SubscriptionError,
};
