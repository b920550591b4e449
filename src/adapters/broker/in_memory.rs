//! In-memory message broker.
//!
//! Single-process stand-in for a real broker. Supports what the bus needs:
//!
//! | Feature | Behaviour |
//! |---------|-----------|
//! | Exchanges | Direct routing only; declaring twice is a no-op |
//! | Queues | Named, or broker-generated (`amq.gen-N`) when declared with `""` |
//! | Bindings | `(exchange, queue, routing key)` triples |
//! | Consumers | One per queue; deliveries pushed sequentially by a spawned task |
//! | Acks | Manual; unknown tags are a protocol error |
//!
//! Fault injection (`fail_next_connects`, `fail_next_channels`,
//! `fail_next_publishes`, `emit_connection_signal`, `emit_channel_error`)
//! and inspection helpers let tests drive outages deterministically.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::ports::{
    BrokerChannel, BrokerConnection, ChannelError, ConnectionSettings, ConnectionSignal,
    Delivery, DeliveryHandler, ExchangeKind, PublishProperties, Transport, TransportError,
};

/// A message accepted by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
    pub mandatory: bool,
    /// Number of queues the message was routed to.
    pub routed_to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct QueueState {
    tx: UnboundedSender<Delivery>,
    // Locked by the consumer task for as long as it runs.
    rx: Arc<AsyncMutex<UnboundedReceiver<Delivery>>>,
    consumer: Option<Weak<ChannelInner>>,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            consumer: None,
        }
    }

    fn has_consumer(&self) -> bool {
        self.consumer
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|c| c.open.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: HashSet<Binding>,
    connections: Vec<Weak<ConnectionInner>>,
    connect_failures: VecDeque<TransportError>,
    publish_failures: VecDeque<TransportError>,
    channel_failures: VecDeque<TransportError>,
    connect_attempts: Vec<Instant>,
    publish_attempts: usize,
    published: Vec<PublishedMessage>,
    unacked: HashSet<u64>,
    acked: Vec<u64>,
    next_delivery_tag: u64,
    next_queue: u64,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> usize {
        let queues: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        let mut routed = 0;
        for queue in queues {
            let Some(state) = self.queues.get(&queue) else {
                continue;
            };
            self.next_delivery_tag += 1;
            let delivery = Delivery {
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
                delivery_tag: self.next_delivery_tag,
            };
            if state.tx.send(delivery).is_ok() {
                self.unacked.insert(self.next_delivery_tag);
                routed += 1;
            }
        }
        routed
    }

    fn open_connections(&self) -> Vec<Arc<ConnectionInner>> {
        self.connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.open.load(Ordering::SeqCst))
            .collect()
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    acked: watch::Sender<usize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process broker implementing [`Transport`].
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        let (acked, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                acked,
            }),
        }
    }

    // === Fault Injection ===

    /// Makes the next `count` connection attempts fail with `error`.
    pub fn fail_next_connects(&self, count: usize, error: TransportError) {
        let mut state = self.shared.lock();
        state
            .connect_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Makes the next `count` publish calls fail with `error`.
    pub fn fail_next_publishes(&self, count: usize, error: TransportError) {
        let mut state = self.shared.lock();
        state
            .publish_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Makes the next `count` channel opens fail with `error`.
    pub fn fail_next_channels(&self, count: usize, error: TransportError) {
        let mut state = self.shared.lock();
        state
            .channel_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Sends `signal` to every open connection. A shutdown also closes them.
    ///
    /// Returns the number of connections signalled.
    pub fn emit_connection_signal(&self, signal: ConnectionSignal) -> usize {
        let connections = self.shared.lock().open_connections();
        let shutdown = matches!(signal, ConnectionSignal::Shutdown(_));

        for connection in &connections {
            if shutdown {
                connection.shut_down("connection shut down by broker");
            }
            connection.signal(signal.clone());
        }
        connections.len()
    }

    /// Raises a callback error on every open channel that has a consumer.
    ///
    /// Returns the number of channels signalled.
    pub fn emit_channel_error(&self, reason: &str) -> usize {
        let connections = self.shared.lock().open_connections();
        let mut signalled = 0;

        for connection in connections {
            for channel in connection.live_channels() {
                if channel.has_consumer() {
                    channel.raise(reason);
                    signalled += 1;
                }
            }
        }
        signalled
    }

    /// Routes a message as if another publisher had sent it.
    ///
    /// Bypasses publish faults. Returns the number of queues it reached.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: &[u8]) -> usize {
        self.shared.lock().route(exchange, routing_key, body)
    }

    // === Inspection ===

    /// Number of connection attempts made so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.lock().connect_attempts.len()
    }

    /// When each connection attempt happened.
    pub fn connect_attempt_times(&self) -> Vec<Instant> {
        self.shared.lock().connect_attempts.clone()
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.shared.lock().open_connections().len()
    }

    /// Number of publish calls, failed ones included.
    pub fn publish_attempts(&self) -> usize {
        self.shared.lock().publish_attempts
    }

    /// Messages accepted so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.clone()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.shared.lock().exchanges.contains_key(name)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.shared.lock().queues.keys().cloned().collect()
    }

    /// Whether `queue` is bound to `exchange` with `routing_key`.
    pub fn is_bound(&self, exchange: &str, queue: &str, routing_key: &str) -> bool {
        self.shared.lock().bindings.contains(&Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        })
    }

    /// Routing keys bound to `queue`, sorted.
    pub fn routing_keys(&self, queue: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .shared
            .lock()
            .bindings
            .iter()
            .filter(|b| b.queue == queue)
            .map(|b| b.routing_key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Whether a consumer is attached to `queue`.
    pub fn has_consumer(&self, queue: &str) -> bool {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(QueueState::has_consumer)
            .unwrap_or(false)
    }

    /// Delivery tags acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<u64> {
        self.shared.lock().acked.clone()
    }

    /// Deliveries routed but not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Waits until at least `count` deliveries have been acknowledged.
    pub async fn wait_for_acks(&self, count: usize) {
        let mut acked = self.shared.acked.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = acked.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn BrokerConnection>, TransportError> {
        let mut state = self.shared.lock();
        state.connect_attempts.push(Instant::now());

        if let Some(error) = state.connect_failures.pop_front() {
            tracing::debug!(endpoint = %settings.endpoint(), %error, "Refusing connection");
            return Err(error);
        }

        let inner = Arc::new(ConnectionInner {
            open: AtomicBool::new(true),
            signals: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        });
        state.connections.retain(|c| c.strong_count() > 0);
        state.connections.push(Arc::downgrade(&inner));

        Ok(Arc::new(InMemoryConnection {
            inner,
            shared: self.shared.clone(),
        }))
    }
}

// ============================================
// Connection
// ============================================

struct ConnectionInner {
    open: AtomicBool,
    signals: Mutex<Vec<UnboundedSender<ConnectionSignal>>>,
    channels: Mutex<Vec<Weak<ChannelInner>>>,
}

impl ConnectionInner {
    fn signal(&self, signal: ConnectionSignal) {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(signal.clone()).is_ok());
    }

    fn live_channels(&self) -> Vec<Arc<ChannelInner>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.open.load(Ordering::SeqCst))
            .collect()
    }

    /// Marks the connection closed and closes its channels with `reason`.
    fn shut_down(&self, reason: &str) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        for channel in self.live_channels() {
            channel.close(Some(reason));
        }
        true
    }
}

struct InMemoryConnection {
    inner: Arc<ConnectionInner>,
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.shut_down("connection closed");
        self.inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn signals(&self) -> UnboundedReceiver<ConnectionSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.is_open() {
            self.inner
                .signals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tx);
        }
        rx
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        if let Some(error) = self.shared.lock().channel_failures.pop_front() {
            return Err(error);
        }

        let inner = Arc::new(ChannelInner {
            open: AtomicBool::new(true),
            errors: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&inner));

        Ok(Box::new(InMemoryChannel {
            inner,
            connection: self.inner.clone(),
            shared: self.shared.clone(),
        }))
    }
}

// ============================================
// Channel
// ============================================

struct ChannelInner {
    open: AtomicBool,
    errors: Mutex<Vec<UnboundedSender<ChannelError>>>,
    consumers: Mutex<Vec<oneshot::Sender<()>>>,
}

impl ChannelInner {
    fn has_consumer(&self) -> bool {
        !self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn raise(&self, reason: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| {
                tx.send(ChannelError {
                    reason: reason.to_string(),
                })
                .is_ok()
            });
    }

    /// Closes the channel, stopping its consumers. With a reason, error
    /// watchers are told why before their streams end.
    fn close(&self, reason: Option<&str>) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(reason) = reason {
            self.raise(reason);
        }
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let consumers =
            std::mem::take(&mut *self.consumers.lock().unwrap_or_else(PoisonError::into_inner));
        for cancel in consumers {
            let _ = cancel.send(());
        }
    }
}

struct InMemoryChannel {
    inner: Arc<ChannelInner>,
    connection: Arc<ConnectionInner>,
    shared: Arc<Shared>,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.inner.open.load(Ordering::SeqCst) && self.connection.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared
            .lock()
            .exchanges
            .entry(name.to_string())
            .or_insert(kind);
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<String, TransportError> {
        self.ensure_open()?;
        let mut state = self.shared.lock();

        let name = if name.is_empty() {
            state.next_queue += 1;
            format!("amq.gen-{}", state.next_queue)
        } else {
            name.to_string()
        };
        state.queues.entry(name.clone()).or_insert_with(QueueState::new);
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.shared.lock();

        if !state.exchanges.contains_key(exchange) {
            return Err(TransportError::NotFound(format!("exchange '{}'", exchange)));
        }
        if !state.queues.contains_key(queue) {
            return Err(TransportError::NotFound(format!("queue '{}'", queue)));
        }

        state.bindings.insert(Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.lock().bindings.remove(&Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: PublishProperties,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.shared.lock();
        state.publish_attempts += 1;

        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error);
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(TransportError::NotFound(format!("exchange '{}'", exchange)));
        }

        let routed_to = state.route(exchange, routing_key, body);
        if routed_to == 0 && mandatory {
            tracing::debug!(exchange, routing_key, "Mandatory message was unroutable");
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            persistent: properties.persistent,
            mandatory,
            routed_to,
        });
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;

        let rx = {
            let mut state = self.shared.lock();
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::NotFound(format!("queue '{}'", queue)))?;
            if queue_state.has_consumer() {
                return Err(TransportError::Protocol(format!(
                    "queue '{}' already has a consumer",
                    queue
                )));
            }
            queue_state.consumer = Some(Arc::downgrade(&self.inner));
            queue_state.rx.clone()
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cancel_tx);

        // Waits for a previous consumer of the queue to stop first.
        tokio::spawn(async move {
            let mut rx = tokio::select! {
                biased;
                _ = &mut cancel_rx => return,
                rx = rx.lock_owned() => rx,
            };
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    delivery = rx.recv() => match delivery {
                        Some(delivery) => handler.on_delivery(delivery).await,
                        None => break,
                    },
                }
            }
        });

        Ok(format!("ctag-{}", queue))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.ensure_open()?;
        {
            let mut state = self.shared.lock();
            if !state.unacked.remove(&delivery_tag) {
                return Err(TransportError::Protocol(format!(
                    "unknown delivery tag {}",
                    delivery_tag
                )));
            }
            state.acked.push(delivery_tag);
        }
        self.shared.acked.send_modify(|n| *n += 1);
        Ok(())
    }

    fn errors(&self) -> UnboundedReceiver<ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.open.load(Ordering::SeqCst) {
            self.inner
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tx);
        }
        rx
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close(None);
        Ok(())
    }
}
