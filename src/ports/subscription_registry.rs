//! SubscriptionRegistry port - Which handlers listen to which event names.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::domain::foundation::IntegrationEvent;
use crate::domain::subscriptions::{HandlerType, Subscription, SubscriptionError};

/// Raised when the last subscription for an event name is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRemoved {
    pub event_name: String,
}

/// Registry of subscriptions keyed by event name.
///
/// Subscriptions for one event name are kept in insertion order, and that is
/// the order handlers run in. At most one subscription per
/// `(event name, handler type)` pair is allowed.
///
/// An event name is present iff it has at least one subscription. Removing
/// the last one drops the name and sends exactly one [`EventRemoved`] to
/// every receiver obtained from [`watch_removals`](Self::watch_removals).
pub trait SubscriptionRegistry: Send + Sync {
    /// Adds a subscription.
    ///
    /// Returns true iff this is now the only subscription for its event
    /// name. The check and the insert happen under one lock.
    ///
    /// # Errors
    ///
    /// `SubscriptionError::Duplicate` if the handler type is already
    /// registered for the event name; the registry is left unchanged.
    fn add_subscription(&self, subscription: Subscription) -> Result<bool, SubscriptionError>;

    /// Removes the subscription for `(event_name, handler_type)`, if any.
    fn remove_subscription(&self, event_name: &str, handler_type: HandlerType);

    /// Subscriptions for an event name, in registration order.
    ///
    /// # Errors
    ///
    /// `SubscriptionError::UnknownEvent` if nothing is registered for it.
    fn subscriptions_for_event(&self, event_name: &str)
        -> Result<Vec<Subscription>, SubscriptionError>;

    fn has_subscription_for_event(&self, event_name: &str) -> bool;

    fn is_empty(&self) -> bool;

    /// Drops every subscription without sending removal notifications.
    fn clear(&self);

    /// Currently registered event names.
    fn event_names(&self) -> Vec<String>;

    /// New receiver for removal notifications.
    fn watch_removals(&self) -> UnboundedReceiver<EventRemoved>;
}

/// Routing key for an event type.
pub fn event_name_of<E: IntegrationEvent>() -> &'static str {
    E::EVENT_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::InMemorySubscriptionRegistry;
    use std::sync::Arc;

    fn assert_send_sync<T: Send + Sync + ?Sized>() {}

    #[test]
    fn registry_is_shareable_across_tasks() {
        assert_send_sync::<InMemorySubscriptionRegistry>();
        assert_send_sync::<dyn SubscriptionRegistry>();

        let registry: Arc<dyn SubscriptionRegistry> = Arc::new(InMemorySubscriptionRegistry::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn event_name_comes_from_the_event_type() {
        use crate::domain::foundation::EventData;
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        struct PaymentCaptured {
            #[serde(flatten)]
            header: EventData,
        }
        crate::integration_event!(PaymentCaptured, header = header, event_name = "payments.captured");

        assert_eq!(event_name_of::<PaymentCaptured>(), "payments.captured");
    }
}
