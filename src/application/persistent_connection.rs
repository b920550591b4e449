//! PersistentConnection - Self-healing broker connection.
//!
//! Owns the single broker connection shared by the bus. Establishing and
//! re-establishing it is single-flight: every attempt runs under one async
//! mutex, and a caller arriving while an attempt is in progress waits for it
//! and shares its outcome.
//!
//! ## Retry Schedule
//!
//! | Attempt | Wait before next |
//! |---------|------------------|
//! | 1 | 2s |
//! | 2 | 4s |
//! | k | 2^k s |
//! | `retry_count` | none, give up |
//!
//! Only transient transport errors are retried.
//!
//! ## Reconnects
//!
//! Each established connection gets a generation number. A watcher task per
//! connection forwards its first shutdown, callback-error or blocked signal
//! to the reconnect path, which ignores signals from connections that have
//! already been replaced.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Mutex};

use super::errors::ConnectionError;
use crate::domain::retry::RetryPolicy;
use crate::ports::{
    BrokerChannel, BrokerConnection, ConnectionSettings, ConnectionSignal, Transport,
    TransportError,
};

/// Lifecycle of a [`PersistentConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal.
    Disposed,
}

/// Cloneable handle to the shared broker connection.
///
/// # Example
///
/// ```ignore
/// let connection = PersistentConnection::new(transport, config.broker.settings(), config.bus.retry_policy());
/// if !connection.try_connect().await {
///     tracing::error!("broker unavailable");
/// }
/// let channel = connection.create_channel().await?;
/// ```
#[derive(Clone)]
pub struct PersistentConnection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: ConnectionSettings,
    retry: RetryPolicy,
    /// Single-flight gate; holds the generation of the current connection.
    gate: Mutex<u64>,
    current: RwLock<Option<Arc<dyn BrokerConnection>>>,
    disposed: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl PersistentConnection {
    /// Creates a disconnected handle. Nothing is attempted until
    /// [`try_connect`](Self::try_connect).
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ConnectionSettings,
        retry: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                retry,
                gate: Mutex::new(0),
                current: RwLock::new(None),
                disposed: AtomicBool::new(false),
                state,
            }),
        }
    }

    /// `host:port` of the broker.
    pub fn endpoint(&self) -> String {
        self.inner.settings.endpoint()
    }

    /// True iff a connection is open and the handle is not disposed.
    pub fn is_connected(&self) -> bool {
        self.inner.open_connection().is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver observing state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Connects if not already connected.
    ///
    /// Returns true iff an open connection exists when the call completes.
    /// Concurrent callers share one attempt.
    pub async fn try_connect(&self) -> bool {
        if self.inner.is_disposed() {
            return false;
        }

        let mut generation = self.inner.gate.lock().await;
        if self.inner.is_disposed() {
            return false;
        }
        if self.is_connected() {
            return true;
        }

        Inner::connect_locked(&self.inner, &mut generation).await
    }

    /// Opens a channel on the current connection.
    ///
    /// # Errors
    ///
    /// - `Disposed` after [`dispose`](Self::dispose)
    /// - `NotConnected` when no open connection exists
    /// - `Transport` when the broker refuses the channel
    pub async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, ConnectionError> {
        if self.inner.is_disposed() {
            return Err(ConnectionError::Disposed);
        }
        let connection = self
            .inner
            .open_connection()
            .ok_or(ConnectionError::NotConnected)?;

        Ok(connection.create_channel().await?)
    }

    /// Closes the connection. Idempotent; close errors are logged.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let connection = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "Error closing broker connection");
            }
        }

        self.inner.state.send_replace(ConnectionState::Disposed);
        tracing::info!(endpoint = %self.endpoint(), "Broker connection disposed");
    }
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn open_connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        if self.is_disposed() {
            return None;
        }
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|c| c.is_open())
            .cloned()
    }

    fn set_state(&self, state: ConnectionState) {
        if !self.is_disposed() {
            self.state.send_replace(state);
        }
    }

    /// Runs the attempt loop. Caller must hold the gate.
    async fn connect_locked(inner: &Arc<Inner>, generation: &mut u64) -> bool {
        let endpoint = inner.settings.endpoint();
        inner.set_state(ConnectionState::Connecting);
        tracing::info!(%endpoint, "Connecting to broker");

        let transport: &dyn Transport = &*inner.transport;
        let settings = &inner.settings;
        let result = inner
            .retry
            .run(
                move |_| transport.connect(settings),
                TransportError::is_transient,
                |error, attempt, delay| {
                    tracing::warn!(
                        %endpoint,
                        attempt,
                        error = %error,
                        retry_in_secs = delay.as_secs(),
                        "Broker connection attempt failed"
                    );
                },
            )
            .await;

        let connection = match result {
            Ok(connection) if connection.is_open() => connection,
            Ok(_) => {
                tracing::error!(%endpoint, "Broker connection closed right after opening");
                inner.set_state(ConnectionState::Disconnected);
                return false;
            }
            Err(error) => {
                if error.is_transient() {
                    tracing::error!(
                        %endpoint,
                        attempts = inner.retry.attempts(),
                        error = %error,
                        "Could not connect to broker, giving up"
                    );
                } else {
                    tracing::error!(%endpoint, error = %error, "Broker refused connection");
                }
                inner.set_state(ConnectionState::Disconnected);
                return false;
            }
        };

        if inner.is_disposed() {
            let _ = connection.close().await;
            return false;
        }

        *generation += 1;
        let signals = connection.signals();
        *inner.current.write().unwrap_or_else(PoisonError::into_inner) = Some(connection);
        inner.set_state(ConnectionState::Connected);
        tracing::info!(%endpoint, generation = *generation, "Connected to broker");

        tokio::spawn(watch_signals(Arc::downgrade(inner), *generation, signals));
        true
    }

    /// Replaces the connection of `generation` after it reported a problem.
    fn reconnect(inner: Arc<Inner>, generation: u64) -> BoxFuture<'static, bool> {
        Box::pin(async move {
            if inner.is_disposed() {
                return false;
            }

            let mut current = inner.gate.lock().await;
            if inner.is_disposed() {
                return false;
            }
            if *current != generation {
                tracing::debug!(
                    signalled = generation,
                    current = *current,
                    "Ignoring signal from replaced connection"
                );
                return inner.open_connection().is_some();
            }

            let stale = inner
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(stale) = stale {
                if let Err(e) = stale.close().await {
                    tracing::debug!(error = %e, "Error closing stale broker connection");
                }
            }

            Inner::connect_locked(&inner, &mut current).await
        })
    }
}

async fn watch_signals(
    inner: Weak<Inner>,
    generation: u64,
    mut signals: UnboundedReceiver<ConnectionSignal>,
) {
    let Some(signal) = signals.recv().await else {
        return;
    };
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.is_disposed() {
        return;
    }

    tracing::warn!(
        endpoint = %inner.settings.endpoint(),
        generation,
        signal = ?signal,
        "Broker connection interrupted, reconnecting"
    );
    Inner::reconnect(inner, generation).await;
}
