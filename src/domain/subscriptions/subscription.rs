//! Subscription records and the invokers they carry.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use super::handler::{DynamicEventHandler, EventHandler, HandlerError};
use crate::domain::foundation::IntegrationEvent;

/// Handler instance handed out by a resolution scope.
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// Errors raised by the subscription registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The `(event name, handler type)` pair is already registered.
    #[error("Handler type {handler} already registered for '{event_name}'")]
    Duplicate {
        event_name: String,
        handler: &'static str,
    },

    /// No subscription exists for the event name.
    #[error("No subscriptions registered for '{0}'")]
    UnknownEvent(String),
}

/// Failure of one subscription while dispatching a message.
///
/// Never escapes the consume loop: the bus logs it and moves on to the next
/// subscription.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("payload could not be deserialized: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("resolved instance is not a {expected}")]
    HandlerTypeMismatch { expected: &'static str },
}

// ============================================
// Type tags
// ============================================

/// Identity of a handler type.
///
/// Equality and hashing use the `TypeId` only; the name is kept for logs.
#[derive(Debug, Clone, Copy)]
pub struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    /// Tag for the handler type `H`.
    pub fn of<H: Any>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: type_name::<H>(),
        }
    }

    /// Runtime identity.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for HandlerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HandlerType {}

impl Hash for HandlerType {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.id.hash(state);
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Identity of the payload type a typed subscription deserializes into.
#[derive(Debug, Clone, Copy)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    /// Tag for the payload type `E`.
    pub fn of<E: Any>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: type_name::<E>(),
        }
    }

    /// Runtime identity.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

// ============================================
// Payload
// ============================================

/// Body of one delivered message.
///
/// The JSON value is parsed on first request and shared afterwards, so every
/// dynamic handler of a message sees the same parse (or the same failure).
pub struct Payload<'a> {
    text: &'a str,
    parsed: OnceLock<Result<Arc<JsonValue>, Arc<serde_json::Error>>>,
}

impl<'a> Payload<'a> {
    /// Wraps the decoded message text.
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            parsed: OnceLock::new(),
        }
    }

    /// Raw message text.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Parsed JSON value, parsing on first use.
    pub fn json(&self) -> Result<Arc<JsonValue>, DispatchError> {
        self.parsed
            .get_or_init(|| {
                serde_json::from_str(self.text)
                    .map(Arc::new)
                    .map_err(Arc::new)
            })
            .clone()
            .map_err(DispatchError::Serialization)
    }

    /// Whether the body has been parsed already.
    pub fn is_parsed(&self) -> bool {
        self.parsed.get().is_some()
    }
}

// ============================================
// Subscription
// ============================================

type HandlerCall = BoxFuture<'static, Result<(), HandlerError>>;
type TypedInvoker =
    Arc<dyn Fn(HandlerInstance, &str) -> Result<HandlerCall, DispatchError> + Send + Sync>;
type DynamicInvoker =
    Arc<dyn Fn(HandlerInstance, Arc<JsonValue>) -> Result<HandlerCall, DispatchError> + Send + Sync>;

/// Invocation captured at subscription time, monomorphised over the payload
/// and handler types.
#[derive(Clone)]
enum Invoker {
    Typed(TypedInvoker),
    Dynamic(DynamicInvoker),
}

/// Immutable binding of a handler type to an event name.
///
/// Identity for uniqueness is `(event_name, handler_type)`. Typed
/// subscriptions carry the payload type; dynamic ones do not.
#[derive(Clone)]
pub struct Subscription {
    event_name: String,
    payload_type: Option<PayloadType>,
    handler_type: HandlerType,
    invoker: Invoker,
}

impl Subscription {
    /// Typed subscription: bodies are deserialized into `E` and passed to `H`.
    pub fn typed<E, H>(event_name: impl Into<String>) -> Self
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        let invoker: TypedInvoker = Arc::new(|instance: HandlerInstance, body: &str| {
            let handler = downcast::<H>(instance)?;
            let event: E = serde_json::from_str(body)
                .map_err(|e| DispatchError::Serialization(Arc::new(e)))?;
            Ok(async move { handler.handle(event).await }.boxed())
        });

        Self {
            event_name: event_name.into(),
            payload_type: Some(PayloadType::of::<E>()),
            handler_type: HandlerType::of::<H>(),
            invoker: Invoker::Typed(invoker),
        }
    }

    /// Dynamic subscription: `H` receives the parsed JSON body.
    pub fn dynamic<H>(event_name: impl Into<String>) -> Self
    where
        H: DynamicEventHandler,
    {
        let invoker: DynamicInvoker = Arc::new(|instance: HandlerInstance, value: Arc<JsonValue>| {
            let handler = downcast::<H>(instance)?;
            Ok(async move { handler.handle(&value).await }.boxed())
        });

        Self {
            event_name: event_name.into(),
            payload_type: None,
            handler_type: HandlerType::of::<H>(),
            invoker: Invoker::Dynamic(invoker),
        }
    }

    /// Routing key this subscription listens on.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Payload type for typed subscriptions.
    pub fn payload_type(&self) -> Option<PayloadType> {
        self.payload_type
    }

    /// Handler type to resolve per message.
    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    /// True when the handler receives raw JSON.
    pub fn is_dynamic(&self) -> bool {
        self.payload_type.is_none()
    }

    /// Invokes the resolved handler with this message.
    ///
    /// Deserialization failures, handler errors and handler panics all come
    /// back as `DispatchError`.
    pub async fn invoke(
        &self,
        instance: HandlerInstance,
        payload: &Payload<'_>,
    ) -> Result<(), DispatchError> {
        let call = match &self.invoker {
            Invoker::Typed(invoke) => invoke(instance, payload.text())?,
            Invoker::Dynamic(invoke) => invoke(instance, payload.json()?)?,
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result.map_err(DispatchError::Handler),
            Err(panic) => Err(DispatchError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("payload_type", &self.payload_type.map(|p| p.name()))
            .field("handler_type", &self.handler_type.name())
            .finish()
    }
}

fn downcast<H: Any + Send + Sync>(instance: HandlerInstance) -> Result<Arc<H>, DispatchError> {
    instance
        .downcast::<H>()
        .map_err(|_| DispatchError::HandlerTypeMismatch {
            expected: type_name::<H>(),
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
