//! EventBus - Typed and dynamic publish/subscribe over the broker.
//!
//! Publishing serializes an [`IntegrationEvent`] to JSON and sends it to a
//! direct exchange with the event name as routing key. Consuming runs through
//! one long-lived consumer channel whose queue is bound to every event name
//! that has at least one subscription.
//!
//! ## Binding Lifecycle
//!
//! - First subscription for an event name: the queue is bound to it
//! - Last subscription removed: the registry raises a removal, and the bus
//!   unbinds the routing key before `unsubscribe*` returns
//!
//! ## Consumer Recovery
//!
//! A supervisor task watches the consumer channel. When the channel reports
//! an error or closes underneath the bus (for example because the connection
//! was replaced), the channel, queue and consumer are recreated and every
//! registered event name is bound again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::errors::EventBusError;
use super::persistent_connection::{ConnectionState, PersistentConnection};
use crate::domain::foundation::{EventId, IntegrationEvent};
use crate::domain::retry::RetryPolicy;
use crate::domain::subscriptions::{
    DynamicEventHandler, EventHandler, HandlerType, Subscription,
};
use crate::ports::{
    BrokerChannel, ChannelError, Delivery, DeliveryHandler, EventRemoved, ExchangeKind,
    HandlerResolver, PublishProperties, SubscriptionRegistry, TransportError,
};

/// Exchange and queue the bus works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Direct exchange events are published to.
    pub exchange_name: String,
    /// Consumer queue; empty lets the broker generate a name.
    pub queue_name: String,
    /// Backoff for publish retries and consumer recovery.
    pub retry: RetryPolicy,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            exchange_name: "event_bus".to_string(),
            queue_name: String::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BusSettings {
    pub fn with_exchange_name(mut self, name: impl Into<String>) -> Self {
        self.exchange_name = name.into();
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Publish/subscribe front end.
///
/// Cloning yields another handle to the same bus. Dropping the last handle
/// stops the supervisor and closes the consumer channel in the background;
/// call [`dispose`](Self::dispose) to wait for the close.
///
/// # Example
///
/// ```ignore
/// let bus = EventBus::start(connection, registry, resolver, BusSettings::default()).await?;
///
/// bus.subscribe::<OrderPlaced, Billing>().await?;
/// bus.subscribe_dynamic::<AuditTrail>("OrderPlaced").await?;
///
/// bus.publish(&OrderPlaced { header: EventData::new(), order_id: 7 }).await?;
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    connection: PersistentConnection,
    registry: Arc<dyn SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    settings: BusSettings,
    consumer: Mutex<Option<Consumer>>,
    removals: Mutex<UnboundedReceiver<EventRemoved>>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

struct Consumer {
    channel: Arc<dyn BrokerChannel>,
    queue: String,
}

impl EventBus {
    /// Starts the bus: opens the consumer channel, declares the exchange and
    /// queue, starts consuming and binds any event names already registered.
    ///
    /// # Errors
    ///
    /// Fails if the consumer cannot be set up, typically because no broker
    /// connection could be established.
    pub async fn start(
        connection: PersistentConnection,
        registry: Arc<dyn SubscriptionRegistry>,
        resolver: Arc<dyn HandlerResolver>,
        settings: BusSettings,
    ) -> Result<Self, EventBusError> {
        let removals = registry.watch_removals();
        let inner = Arc::new(BusInner {
            dispatcher: Arc::new(Dispatcher::new(registry.clone(), resolver)),
            connection,
            registry,
            settings,
            consumer: Mutex::new(None),
            removals: Mutex::new(removals),
            supervisor: std::sync::Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let errors = inner.open_consumer().await?;
        let supervisor = tokio::spawn(supervise(Arc::downgrade(&inner), errors));
        *inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(supervisor);

        tracing::info!(
            exchange = %inner.settings.exchange_name,
            endpoint = %inner.connection.endpoint(),
            "Event bus started"
        );
        Ok(Self { inner })
    }

    /// The shared connection.
    pub fn connection(&self) -> &PersistentConnection {
        &self.inner.connection
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<dyn SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn exchange_name(&self) -> &str {
        &self.inner.settings.exchange_name
    }

    /// Name of the consumer queue, as assigned by the broker.
    pub async fn queue_name(&self) -> Option<String> {
        self.inner
            .consumer
            .lock()
            .await
            .as_ref()
            .map(|c| c.queue.clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // === Publishing ===

    /// Publishes `event` under its declared event name.
    pub async fn publish<E: IntegrationEvent>(&self, event: &E) -> Result<(), EventBusError> {
        self.publish_as(E::EVENT_NAME, event).await
    }

    /// Publishes `event` under an explicit event name.
    ///
    /// The message is persistent and mandatory. Transient transport failures
    /// of the publish call are retried with the bus backoff policy; other
    /// failures are returned at once.
    pub async fn publish_as<E: IntegrationEvent>(
        &self,
        event_name: &str,
        event: &E,
    ) -> Result<(), EventBusError> {
        self.inner.ensure_active()?;
        self.inner.ensure_connected().await;

        let body = serde_json::to_vec(event)?;
        let channel = self.inner.connection.create_channel().await?;

        let result = self
            .inner
            .publish_on(&*channel, event_name, event.event_id(), &body)
            .await;

        if let Err(e) = channel.close().await {
            tracing::debug!(error = %e, "Error closing publish channel");
        }
        result
    }

    // === Subscribing ===

    /// Subscribes `H` to `E` under the event's declared name.
    pub async fn subscribe<E, H>(&self) -> Result<(), EventBusError>
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        self.subscribe_as::<E, H>(E::EVENT_NAME).await
    }

    /// Subscribes `H` to `E` under an explicit event name.
    pub async fn subscribe_as<E, H>(&self, event_name: &str) -> Result<(), EventBusError>
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        self.inner
            .add_subscription(Subscription::typed::<E, H>(event_name))
            .await
    }

    /// Subscribes the dynamic handler `H` to `event_name`.
    pub async fn subscribe_dynamic<H>(&self, event_name: &str) -> Result<(), EventBusError>
    where
        H: DynamicEventHandler,
    {
        self.inner
            .add_subscription(Subscription::dynamic::<H>(event_name))
            .await
    }

    /// Removes the `H` subscription for `E`'s declared name.
    pub async fn unsubscribe<E, H>(&self) -> Result<(), EventBusError>
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        self.unsubscribe_as::<E, H>(E::EVENT_NAME).await
    }

    /// Removes the `H` subscription for an explicit event name.
    pub async fn unsubscribe_as<E, H>(&self, event_name: &str) -> Result<(), EventBusError>
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        self.inner
            .remove_subscription(event_name, HandlerType::of::<H>())
            .await
    }

    /// Removes the dynamic `H` subscription for `event_name`.
    pub async fn unsubscribe_dynamic<H>(&self, event_name: &str) -> Result<(), EventBusError>
    where
        H: DynamicEventHandler,
    {
        self.inner
            .remove_subscription(event_name, HandlerType::of::<H>())
            .await
    }

    /// Stops consuming and closes the consumer channel. Idempotent.
    ///
    /// The shared connection stays open; dispose it separately.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let supervisor = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        let consumer = self.inner.consumer.lock().await.take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.channel.close().await {
                tracing::warn!(error = %e, "Error closing consumer channel");
            }
        }
        tracing::info!(exchange = %self.inner.settings.exchange_name, "Event bus disposed");
    }
}

impl BusInner {
    fn ensure_active(&self) -> Result<(), EventBusError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(EventBusError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn ensure_connected(&self) {
        if !self.connection.is_connected() {
            self.connection.try_connect().await;
        }
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, EventBusError> {
        self.ensure_connected().await;
        Ok(self.connection.create_channel().await?)
    }

    async fn publish_on(
        &self,
        channel: &dyn BrokerChannel,
        event_name: &str,
        event_id: &EventId,
        body: &[u8],
    ) -> Result<(), EventBusError> {
        let exchange = self.settings.exchange_name.as_str();
        channel.declare_exchange(exchange, ExchangeKind::Direct).await?;

        let properties = PublishProperties { persistent: true };
        let result = self
            .settings
            .retry
            .run(
                move |_| channel.publish(exchange, event_name, true, properties, body),
                TransportError::is_transient,
                |error, attempt, delay| {
                    tracing::warn!(
                        event_id = %event_id,
                        event_name,
                        attempt,
                        error = %error,
                        retry_in_secs = delay.as_secs(),
                        "Could not publish event"
                    );
                },
            )
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(event_id = %event_id, event_name, "Published integration event");
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    event_id = %event_id,
                    event_name,
                    error = %error,
                    "Giving up publishing integration event"
                );
                Err(error.into())
            }
        }
    }

    async fn add_subscription(&self, subscription: Subscription) -> Result<(), EventBusError> {
        self.ensure_active()?;

        let event_name = subscription.event_name().to_string();
        let handler_type = subscription.handler_type();
        tracing::info!(
            event_name = %event_name,
            handler = handler_type.name(),
            "Subscribing to event"
        );

        if !self.registry.add_subscription(subscription)? {
            return Ok(());
        }
        if let Err(e) = self.bind(&event_name).await {
            tracing::warn!(event_name = %event_name, error = %e, "Could not bind event, rolling back subscription");
            self.registry.remove_subscription(&event_name, handler_type);
            // Best effort: the failed name was never bound.
            let _ = self.apply_removals(Some(&event_name)).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove_subscription(
        &self,
        event_name: &str,
        handler_type: HandlerType,
    ) -> Result<(), EventBusError> {
        self.ensure_active()?;
        tracing::info!(event_name, handler = handler_type.name(), "Unsubscribing from event");

        self.registry.remove_subscription(event_name, handler_type);
        self.apply_removals(None).await
    }

    /// Unbinds every event name the registry reported as removed, except
    /// `never_bound`, which is only drained.
    async fn apply_removals(&self, never_bound: Option<&str>) -> Result<(), EventBusError> {
        let mut removals = self.removals.lock().await;
        let mut first_error = None;

        while let Ok(removed) = removals.try_recv() {
            if never_bound == Some(removed.event_name.as_str()) {
                continue;
            }
            if let Err(e) = self.unbind(&removed.event_name).await {
                tracing::warn!(event_name = %removed.event_name, error = %e, "Could not unbind event");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn bind(&self, event_name: &str) -> Result<(), EventBusError> {
        let consumer = self.consumer.lock().await;
        let Some(consumer) = consumer.as_ref() else {
            tracing::debug!(event_name, "No consumer, binding deferred to recovery");
            return Ok(());
        };

        let channel = self.open_channel().await?;
        let result = channel
            .bind_queue(&consumer.queue, &self.settings.exchange_name, event_name)
            .await;
        let _ = channel.close().await;

        result?;
        tracing::debug!(event_name, queue = %consumer.queue, "Bound routing key");
        Ok(())
    }

    async fn unbind(&self, event_name: &str) -> Result<(), EventBusError> {
        let consumer = self.consumer.lock().await;
        let Some(consumer) = consumer.as_ref() else {
            return Ok(());
        };
        // Under the consumer lock; a racing first subscribe binds after us.
        if self.registry.has_subscription_for_event(event_name) {
            tracing::debug!(event_name, "Re-subscribed since removal, keeping binding");
            return Ok(());
        }

        let channel = self.open_channel().await?;
        let result = channel
            .unbind_queue(&consumer.queue, &self.settings.exchange_name, event_name)
            .await;
        let _ = channel.close().await;

        result?;
        tracing::debug!(event_name, queue = %consumer.queue, "Unbound routing key");
        Ok(())
    }

    /// Replaces the consumer channel and re-binds every registered event
    /// name. Returns the error stream of the new channel.
    async fn open_consumer(&self) -> Result<UnboundedReceiver<ChannelError>, EventBusError> {
        let mut slot = self.consumer.lock().await;
        if let Some(old) = slot.take() {
            if let Err(e) = old.channel.close().await {
                tracing::debug!(error = %e, "Error closing previous consumer channel");
            }
        }

        self.ensure_connected().await;
        let channel: Arc<dyn BrokerChannel> = Arc::from(self.connection.create_channel().await?);
        let (queue, errors) = match self.declare_consumer(&channel).await {
            Ok(declared) => declared,
            Err(e) => {
                let _ = channel.close().await;
                return Err(e.into());
            }
        };

        *slot = Some(Consumer {
            channel: channel.clone(),
            queue: queue.clone(),
        });

        for event_name in self.registry.event_names() {
            channel
                .bind_queue(&queue, &self.settings.exchange_name, &event_name)
                .await?;
        }

        tracing::info!(queue = %queue, "Consumer channel ready");
        Ok(errors)
    }

    async fn declare_consumer(
        &self,
        channel: &Arc<dyn BrokerChannel>,
    ) -> Result<(String, UnboundedReceiver<ChannelError>), TransportError> {
        let errors = channel.errors();
        channel
            .declare_exchange(&self.settings.exchange_name, ExchangeKind::Direct)
            .await?;
        let queue = channel.declare_queue(&self.settings.queue_name).await?;

        let handler = Arc::new(ConsumerHandler {
            dispatcher: self.dispatcher.clone(),
            channel: channel.clone(),
        });
        channel.consume(&queue, handler).await?;
        Ok((queue, errors))
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        if let Some(supervisor) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            supervisor.abort();
        }

        let Some(consumer) = self.consumer.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = consumer.channel.close().await {
                        tracing::debug!(error = %e, "Error closing dropped consumer channel");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(queue = %consumer.queue, "Event bus dropped outside a runtime, consumer channel left open");
            }
        }
    }
}

/// Recreates the consumer whenever its channel fails.
async fn supervise(bus: Weak<BusInner>, mut errors: UnboundedReceiver<ChannelError>) {
    loop {
        let reason = match errors.recv().await {
            Some(error) => error.reason,
            None => "consumer channel closed".to_string(),
        };

        loop {
            let Some(inner) = bus.upgrade() else {
                return;
            };
            if inner.disposed.load(Ordering::SeqCst) {
                return;
            }

            tracing::warn!(%reason, "Recreating consumer channel");
            let reopened = inner.open_consumer().await;
            match reopened {
                Ok(next) => {
                    errors = next;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Could not recreate consumer channel");
                    if inner.connection.state() == ConnectionState::Disposed {
                        return;
                    }
                    let delay = inner.settings.retry.delay_after(1);
                    drop(inner);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Dispatches consumed messages and acknowledges each exactly once.
struct ConsumerHandler {
    dispatcher: Arc<Dispatcher>,
    channel: Arc<dyn BrokerChannel>,
}

#[async_trait]
impl DeliveryHandler for ConsumerHandler {
    async fn on_delivery(&self, delivery: Delivery) {
        let summary = self
            .dispatcher
            .dispatch(&delivery.routing_key, &delivery.body)
            .await;
        tracing::trace!(
            event_name = %delivery.routing_key,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Dispatched integration event"
        );

        if let Err(e) = self.channel.ack(delivery.delivery_tag).await {
            tracing::warn!(
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Could not acknowledge message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FactoryResolver, InMemoryBroker, InMemorySubscriptionRegistry};
    use crate::domain::foundation::EventData;
    use crate::domain::subscriptions::HandlerError;
    use crate::integration_event;
    use crate::ports::ConnectionSettings;
    use serde::{Deserialize, Serialize};
    use serde_json::Value as JsonValue;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CartAbandoned {
        #[serde(flatten)]
        header: EventData,
    }

    integration_event!(CartAbandoned, header = header);

    struct Reminder;

    #[async_trait]
    impl EventHandler<CartAbandoned> for Reminder {
        async fn handle(&self, _: CartAbandoned) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct Audit;

    #[async_trait]
    impl DynamicEventHandler for Audit {
        async fn handle(&self, _: &JsonValue) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    async fn start_bus(broker: &InMemoryBroker) -> EventBus {
        let connection = PersistentConnection::new(
            Arc::new(broker.clone()),
            ConnectionSettings::default(),
            RetryPolicy::default(),
        );
        let resolver = FactoryResolver::new()
            .register(|| Reminder)
            .register(|| Audit);

        EventBus::start(
            connection,
            Arc::new(InMemorySubscriptionRegistry::new()),
            Arc::new(resolver),
            BusSettings::default().with_queue_name("carts"),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn start_declares_topology_and_consumes() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;

        assert!(broker.has_exchange("event_bus"));
        assert_eq!(bus.queue_name().await.as_deref(), Some("carts"));
        assert!(broker.has_consumer("carts"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_without_broker() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(1, TransportError::Protocol("ACCESS_REFUSED".into()));
        let connection = PersistentConnection::new(
            Arc::new(broker.clone()),
            ConnectionSettings::default(),
            RetryPolicy::default(),
        );

        let result = EventBus::start(
            connection,
            Arc::new(InMemorySubscriptionRegistry::new()),
            Arc::new(FactoryResolver::new()),
            BusSettings::default(),
        )
        .await;

        assert!(matches!(result, Err(EventBusError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_subscription_binds_and_last_unbinds() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;

        bus.subscribe::<CartAbandoned, Reminder>().await.unwrap();
        assert!(broker.is_bound("event_bus", "carts", "CartAbandoned"));

        bus.subscribe_dynamic::<Audit>("CartAbandoned").await.unwrap();
        bus.unsubscribe::<CartAbandoned, Reminder>().await.unwrap();
        assert!(broker.is_bound("event_bus", "carts", "CartAbandoned"));

        bus.unsubscribe_dynamic::<Audit>("CartAbandoned").await.unwrap();
        assert!(!broker.is_bound("event_bus", "carts", "CartAbandoned"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscription_is_rejected() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;
        bus.subscribe::<CartAbandoned, Reminder>().await.unwrap();

        let result = bus.subscribe::<CartAbandoned, Reminder>().await;

        assert!(matches!(result, Err(EventBusError::Subscription(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_names_bind_their_own_routing_key() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;

        bus.subscribe_as::<CartAbandoned, Reminder>("carts.abandoned")
            .await
            .unwrap();
        assert_eq!(broker.routing_keys("carts"), vec!["carts.abandoned"]);

        bus.unsubscribe_as::<CartAbandoned, Reminder>("carts.abandoned")
            .await
            .unwrap();
        assert!(broker.routing_keys("carts").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_bind_rolls_back_the_subscription() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;
        broker.fail_next_channels(1, TransportError::Io("reset".into()));

        let result = bus.subscribe::<CartAbandoned, Reminder>().await;

        assert!(matches!(result, Err(EventBusError::Transport(TransportError::Io(_)))));
        assert!(!bus.registry().has_subscription_for_event("CartAbandoned"));
        assert!(!broker.is_bound("event_bus", "carts", "CartAbandoned"));

        bus.subscribe::<CartAbandoned, Reminder>().await.unwrap();
        assert!(broker.is_bound("event_bus", "carts", "CartAbandoned"));
    }

    #[tokio::test(start_paused = true)]
    async fn later_subscription_is_kept_when_bind_fails() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;
        bus.subscribe::<CartAbandoned, Reminder>().await.unwrap();
        broker.fail_next_channels(1, TransportError::Io("reset".into()));

        // Not the first for the name, so no channel is needed.
        bus.subscribe_dynamic::<Audit>("CartAbandoned").await.unwrap();

        assert_eq!(bus.registry().subscriptions_for_event("CartAbandoned").unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_removal_keeps_binding_of_resubscribed_name() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;
        bus.subscribe::<CartAbandoned, Reminder>().await.unwrap();

        // The removal is queued but not applied until the next unsubscribe.
        bus.registry()
            .remove_subscription("CartAbandoned", HandlerType::of::<Reminder>());
        bus.subscribe_dynamic::<Audit>("CartAbandoned").await.unwrap();
        bus.unsubscribe_as::<CartAbandoned, Reminder>("carts.other")
            .await
            .unwrap();

        assert!(broker.is_bound("event_bus", "carts", "CartAbandoned"));
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_connection_is_reported_as_such() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;

        bus.connection().dispose().await;

        assert!(!bus.is_disposed());
        assert!(matches!(
            bus.publish(&CartAbandoned { header: EventData::new() }).await,
            Err(EventBusError::ConnectionDisposed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_last_handle_stops_consuming() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;
        let other = bus.clone();

        drop(bus);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(broker.has_consumer("carts"));

        drop(other);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!broker.has_consumer("carts"));
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_bus_rejects_calls() {
        let broker = InMemoryBroker::new();
        let bus = start_bus(&broker).await;

        bus.dispose().await;
        bus.dispose().await;

        assert!(bus.is_disposed());
        assert!(bus.queue_name().await.is_none());
        assert!(!broker.has_consumer("carts"));
        assert!(matches!(
            bus.publish(&CartAbandoned { header: EventData::new() }).await,
            Err(EventBusError::Disposed)
        ));
        assert!(matches!(
            bus.subscribe::<CartAbandoned, Reminder>().await,
            Err(EventBusError::Disposed)
        ));
        assert!(bus.connection().is_connected());
    }
}
