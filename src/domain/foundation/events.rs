//! Integration event primitives.
//!
//! This module provides the types every event crossing the bus carries:
//! - `EventId` - Unique identifier for an event instance
//! - `EventData` - Identity and creation time header embedded in each event
//! - `IntegrationEvent` - Trait that all published/subscribed events implement
//! - `integration_event!` - Macro to implement `IntegrationEvent` with minimal boilerplate

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Timestamp;

// ============================================
// IntegrationEvent Trait
// ============================================

/// Trait that all integration events must implement.
///
/// The bus routes by [`IntegrationEvent::EVENT_NAME`], serializes with
/// `serde_json` on publish and deserializes into the concrete type for each
/// typed subscription on delivery. Use the `integration_event!` macro to
/// implement this trait.
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Routing key for this event type.
    ///
    /// Defaults to the type identifier when declared through
    /// `integration_event!`, e.g. `"OrderPlaced"`.
    const EVENT_NAME: &'static str;

    /// Returns the unique ID for this event instance.
    fn event_id(&self) -> &EventId;

    /// Returns when the event was created.
    fn occurred_at(&self) -> Timestamp;
}

/// Macro to implement `IntegrationEvent` for a struct embedding [`EventData`].
///
/// # Example
///
/// ```
/// use integration_event_bus::domain::foundation::EventData;
/// use integration_event_bus::integration_event;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OrderPlaced {
///     #[serde(flatten)]
///     pub header: EventData,
///     pub order_id: u64,
/// }
///
/// integration_event!(OrderPlaced, header = header);
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OrderShipped {
///     #[serde(flatten)]
///     pub header: EventData,
/// }
///
/// integration_event!(OrderShipped, header = header, event_name = "orders.shipped");
/// ```
#[macro_export]
macro_rules! integration_event {
    ($event:ident, header = $header:ident) => {
        $crate::integration_event!($event, header = $header, event_name = stringify!($event));
    };
    ($event:ident, header = $header:ident, event_name = $name:expr) => {
        impl $crate::domain::foundation::IntegrationEvent for $event {
            const EVENT_NAME: &'static str = $name;

            fn event_id(&self) -> &$crate::domain::foundation::EventId {
                &self.$header.id
            }

            fn occurred_at(&self) -> $crate::domain::foundation::Timestamp {
                self.$header.event_time
            }
        }
    };
}

/// Unique identifier for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random EventId using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity and creation time shared by every integration event.
///
/// Embed with `#[serde(flatten)]` so `id` and `event_time` appear at the top
/// level of the JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// Unique ID generated when the event was created.
    pub id: EventId,

    /// UTC creation time.
    pub event_time: Timestamp,
}

impl EventData {
    /// Creates a header with a fresh ID and the current time.
    pub fn new() -> Self {
        Self {
            id: EventId::new(),
            event_time: Timestamp::now(),
        }
    }

    /// Restores a header from a known ID and creation time.
    pub fn with(id: EventId, event_time: Timestamp) -> Self {
        Self { id, event_time }
    }
}

impl Default for EventData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserRegistered {
        #[serde(flatten)]
        header: EventData,
        user_name: String,
    }

    integration_event!(UserRegistered, header = header);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserBanned {
        #[serde(flatten)]
        header: EventData,
    }

    integration_event!(UserBanned, header = header, event_name = "users.banned");

    #[test]
    fn event_name_defaults_to_type_identifier() {
        assert_eq!(UserRegistered::EVENT_NAME, "UserRegistered");
    }

    #[test]
    fn event_name_can_be_overridden() {
        assert_eq!(UserBanned::EVENT_NAME, "users.banned");
    }

    #[test]
    fn accessors_read_the_embedded_header() {
        let header = EventData::new();
        let event = UserRegistered {
            header,
            user_name: "alice".to_string(),
        };

        assert_eq!(event.event_id(), &header.id);
        assert_eq!(event.occurred_at(), header.event_time);
    }

    #[test]
    fn new_headers_get_distinct_ids() {
        assert_ne!(EventData::new().id, EventData::new().id);
    }

    #[test]
    fn header_is_flattened_into_payload() {
        let event = UserRegistered {
            header: EventData::new(),
            user_name: "bob".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        let object = value.as_object().unwrap();

        assert!(object.contains_key("id"));
        assert!(object.contains_key("event_time"));
        assert_eq!(object["user_name"], json!("bob"));
    }

    #[test]
    fn with_restores_known_identity() {
        let id = EventId::from_uuid(Uuid::nil());
        let time = Timestamp::now();
        let header = EventData::with(id, time);

        assert_eq!(header.id.as_uuid(), &Uuid::nil());
        assert_eq!(header.event_time, time);
    }
}
