//! In-memory subscription registry.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::domain::subscriptions::{HandlerType, Subscription, SubscriptionError};
use crate::ports::{EventRemoved, SubscriptionRegistry};

/// Subscription registry backed by a `HashMap` behind an `RwLock`.
///
/// Reads during dispatch run concurrently; adds and removes take the write
/// lock. Removal notifications are sent while the write lock is held, so a
/// receiver never observes a notification before the key is gone.
///
/// # Example
///
/// ```ignore
/// let registry = InMemorySubscriptionRegistry::new();
/// let mut removals = registry.watch_removals();
///
/// registry.add_subscription(Subscription::typed::<OrderPlaced, Billing>("OrderPlaced"))?;
/// registry.remove_subscription("OrderPlaced", HandlerType::of::<Billing>());
///
/// assert_eq!(removals.try_recv()?.event_name, "OrderPlaced");
/// ```
#[derive(Default)]
pub struct InMemorySubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<Subscription>>>,
    listeners: Mutex<Vec<UnboundedSender<EventRemoved>>>,
}

impl InMemorySubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_removed(&self, event_name: &str) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| {
            tx.send(EventRemoved {
                event_name: event_name.to_string(),
            })
            .is_ok()
        });
    }
}

impl SubscriptionRegistry for InMemorySubscriptionRegistry {
    fn add_subscription(&self, subscription: Subscription) -> Result<bool, SubscriptionError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = handlers
            .entry(subscription.event_name().to_string())
            .or_default();

        if entry
            .iter()
            .any(|s| s.handler_type() == subscription.handler_type())
        {
            return Err(SubscriptionError::Duplicate {
                event_name: subscription.event_name().to_string(),
                handler: subscription.handler_type().name(),
            });
        }

        let first = entry.is_empty();
        tracing::debug!(
            event_name = subscription.event_name(),
            handler = subscription.handler_type().name(),
            dynamic = subscription.is_dynamic(),
            first,
            "Subscription added"
        );
        entry.push(subscription);
        Ok(first)
    }

    fn remove_subscription(&self, event_name: &str, handler_type: HandlerType) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        let Some(entry) = handlers.get_mut(event_name) else {
            return;
        };
        let Some(position) = entry.iter().position(|s| s.handler_type() == handler_type) else {
            return;
        };

        entry.remove(position);
        tracing::debug!(event_name, handler = handler_type.name(), "Subscription removed");

        if entry.is_empty() {
            handlers.remove(event_name);
            self.notify_removed(event_name);
        }
    }

    fn subscriptions_for_event(
        &self,
        event_name: &str,
    ) -> Result<Vec<Subscription>, SubscriptionError> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .cloned()
            .ok_or_else(|| SubscriptionError::UnknownEvent(event_name.to_string()))
    }

    fn has_subscription_for_event(&self, event_name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event_name)
    }

    fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn event_names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn watch_removals(&self) -> UnboundedReceiver<EventRemoved> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}
