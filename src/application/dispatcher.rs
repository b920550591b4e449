//! Routes one consumed message to its subscribers.

use std::sync::Arc;

use crate::domain::subscriptions::{DispatchError, Payload};
use crate::ports::{HandlerResolver, SubscriptionRegistry};

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Handlers that completed successfully.
    pub succeeded: usize,
    /// Handlers that failed, panicked or could not decode the payload.
    pub failed: usize,
    /// Subscriptions whose handler could not be resolved.
    pub skipped: usize,
}

impl DispatchSummary {
    /// True when no subscription was considered at all.
    pub fn is_unrouted(&self) -> bool {
        self.succeeded + self.failed + self.skipped == 0
    }
}

/// Delivers message bodies to the handlers subscribed to their event name.
///
/// Subscriptions run one after another in registration order, each with an
/// instance from a resolution scope opened for this message. A failing
/// subscription is logged and never stops the ones after it.
pub struct Dispatcher {
    registry: Arc<dyn SubscriptionRegistry>,
    resolver: Arc<dyn HandlerResolver>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        resolver: Arc<dyn HandlerResolver>,
    ) -> Self {
        Self { registry, resolver }
    }

    /// Dispatches `body` to every subscription for `event_name`.
    pub async fn dispatch(&self, event_name: &str, body: &[u8]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let text = String::from_utf8_lossy(body);
        tracing::debug!(event_name, "Processing integration event");

        if !self.registry.has_subscription_for_event(event_name) {
            tracing::warn!(event_name, "No subscription for integration event");
            return summary;
        }
        let subscriptions = match self.registry.subscriptions_for_event(event_name) {
            Ok(subscriptions) => subscriptions,
            Err(_) => {
                tracing::warn!(event_name, "Subscriptions removed during dispatch");
                return summary;
            }
        };

        let payload = Payload::new(&text);
        let mut scope = self.resolver.begin_scope();

        for subscription in &subscriptions {
            let handler = subscription.handler_type();
            let Some(instance) = scope.resolve(handler) else {
                tracing::debug!(event_name, handler = handler.name(), "Handler not resolvable, skipping");
                summary.skipped += 1;
                continue;
            };

            match subscription.invoke(instance, &payload).await {
                Ok(()) => summary.succeeded += 1,
                Err(DispatchError::HandlerTypeMismatch { expected }) => {
                    tracing::warn!(
                        event_name,
                        handler = handler.name(),
                        expected,
                        "Resolved instance has the wrong type, skipping"
                    );
                    summary.skipped += 1;
                }
                Err(error) => {
                    tracing::error!(
                        event_name,
                        handler = handler.name(),
                        error = %error,
                        message = %text,
                        "Error processing integration event"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
