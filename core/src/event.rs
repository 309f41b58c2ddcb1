//! Event trait, typed event variants and log envelopes.
//!
//! Events are immutable facts. Each aggregate declares a closed set of events as
//! an enum; the [`Event`] trait gives every variant a stable runtime type name
//! used by handler and projection lookup.
//!
//! # Design
//!
//! Events are persisted as bincode bytes inside a [`StoredEvent`]. The type name
//! travels next to the payload so storage backends and projections can filter
//! without deserializing.
//!
//! # Example
//!
//! ```
//! use eventide_core::event::{Event, EventVariant};
//! use eventide_core::event_variants;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! pub struct Deposited { pub amount: u64 }
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! pub struct Withdrawn { pub amount: u64 }
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! pub enum AccountEvent {
//!     Deposited(Deposited),
//!     Withdrawn(Withdrawn),
//! }
//!
//! event_variants!(AccountEvent {
//!     Deposited(Deposited) => "Deposited.v1",
//!     Withdrawn(Withdrawn) => "Withdrawn.v1",
//! });
//!
//! let event = AccountEvent::Deposited(Deposited { amount: 10 });
//! assert_eq!(event.event_type(), "Deposited.v1");
//! assert_eq!(Deposited::EVENT_TYPE, "Deposited.v1");
//! assert!(Withdrawn::from_event(&event).is_none());
//! ```

use crate::stream::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The stored type name does not match the decoded event.
    #[error("Event type mismatch: stored {stored}, decoded {decoded}")]
    TypeMismatch {
        /// Type name recorded in storage.
        stored: String,
        /// Type name of the decoded payload.
        decoded: String,
    },
}

/// An event that can be applied to an aggregate and stored in an event journal.
///
/// # Event Naming Convention
///
/// `event_type()` must return a stable identifier, distinct per variant, that
/// includes a schema version: `"Deposited.v1"`, `"Withdrawn.v2"`.
///
/// Handler and projection routing compare these names for exact equality; there
/// is no notion of a supertype.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` to cross task boundaries in the
/// outbox and projection workers.
pub trait Event: Send + Sync + 'static {
    /// Returns the runtime type identifier of this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupt or
    /// were written with an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A concrete payload carried by exactly one variant of the event enum `E`.
///
/// Typed event handlers are registered against an `EventVariant`; they fire
/// only when `event.event_type() == Self::EVENT_TYPE`.
///
/// Implement it with [`event_variants!`](crate::event_variants) rather than by hand so the
/// type name cannot drift from [`Event::event_type`].
pub trait EventVariant<E: Event>: Send + Sync + 'static {
    /// Runtime type name of the variant carrying this payload.
    const EVENT_TYPE: &'static str;

    /// Borrow the payload if `event` is this variant.
    fn from_event(event: &E) -> Option<&Self>;
}

/// Implements [`Event`] for an event enum and [`EventVariant`] for each of its
/// newtype payloads.
///
/// Every variant must be a single-field tuple variant with a distinct payload
/// type. The enum must be nameable by a plain identifier at the call site.
#[macro_export]
macro_rules! event_variants {
    ($event:ident { $($variant:ident($payload:ty) => $name:literal),+ $(,)? }) => {
        impl $crate::event::Event for $event {
            fn event_type(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $name,)+
                }
            }
        }

        $(
            impl $crate::event::EventVariant<$event> for $payload {
                const EVENT_TYPE: &'static str = $name;

                #[allow(unreachable_patterns)]
                fn from_event(event: &$event) -> ::core::option::Option<&Self> {
                    match event {
                        $event::$variant(inner) => ::core::option::Option::Some(inner),
                        _ => ::core::option::Option::None,
                    }
                }
            }
        )+
    };
}

/// An event together with its position in the log and the time it was raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// The event payload.
    pub event: E,
    /// 1-based position of the event in its owner's log.
    pub version: Version,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
}

impl<E> EventEnvelope<E> {
    /// Wrap an event.
    #[must_use]
    pub const fn new(event: E, version: Version, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            version,
            timestamp,
        }
    }
}

/// Serialized form of an [`EventEnvelope`], as written to an event journal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position of the event in its owner's log.
    pub version: Version,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
    /// The event type identifier (e.g. `"Deposited.v1"`).
    pub event_type: String,
    /// The bincode-serialized event.
    pub data: Vec<u8>,
}

impl StoredEvent {
    /// Serialize an envelope for storage.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_envelope<E: Event + Serialize>(
        envelope: &EventEnvelope<E>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            version: envelope.version,
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            data: envelope.event.to_bytes()?,
        })
    }

    /// Decode back into a typed envelope.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the payload is unreadable and
    /// `EventError::TypeMismatch` if it decodes to a different variant than the
    /// recorded type name.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<EventEnvelope<E>, EventError> {
        let event = E::from_bytes(&self.data)?;
        if event.event_type() != self.event_type {
            return Err(EventError::TypeMismatch {
                stored: self.event_type.clone(),
                decoded: event.event_type().to_string(),
            });
        }
        Ok(EventEnvelope::new(event, self.version, self.timestamp))
    }
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoredEvent {{ version: {}, type: {}, size: {} bytes }}",
            self.version,
            self.event_type,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Opened {
        name: String,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Renamed {
        name: String,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestEvent {
        Opened(Opened),
        Renamed(Renamed),
    }

    event_variants!(TestEvent {
        Opened(Opened) => "TestEvent.Opened.v1",
        Renamed(Renamed) => "TestEvent.Renamed.v1",
    });

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn macro_assigns_type_names() {
        let event = TestEvent::Renamed(Renamed {
            name: "b".to_string(),
        });
        assert_eq!(event.event_type(), "TestEvent.Renamed.v1");
        assert_eq!(Opened::EVENT_TYPE, "TestEvent.Opened.v1");
    }

    #[test]
    fn from_event_matches_only_its_variant() {
        let event = TestEvent::Opened(Opened {
            name: "a".to_string(),
        });
        assert_eq!(Opened::from_event(&event).map(|o| o.name.as_str()), Some("a"));
        assert!(Renamed::from_event(&event).is_none());
    }

    #[test]
    fn stored_event_decodes_to_same_envelope() {
        let envelope = EventEnvelope::new(
            TestEvent::Opened(Opened {
                name: "a".to_string(),
            }),
            Version::new(3),
            at(),
        );
        let stored = StoredEvent::from_envelope(&envelope).expect("serialize");
        assert_eq!(stored.event_type, "TestEvent.Opened.v1");
        assert_eq!(stored.version, Version::new(3));

        let decoded: EventEnvelope<TestEvent> = stored.decode().expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_rejects_type_mismatch() {
        let envelope = EventEnvelope::new(
            TestEvent::Opened(Opened {
                name: "a".to_string(),
            }),
            Version::new(1),
            at(),
        );
        let mut stored = StoredEvent::from_envelope(&envelope).unwrap();
        stored.event_type = "TestEvent.Renamed.v1".to_string();

        let err = stored.decode::<TestEvent>().unwrap_err();
        assert!(matches!(err, EventError::TypeMismatch { .. }));
    }

    #[test]
    fn decode_rejects_garbage() {
        let stored = StoredEvent {
            version: Version::new(1),
            timestamp: at(),
            event_type: "TestEvent.Opened.v1".to_string(),
            data: vec![0xff; 3],
        };
        assert!(matches!(
            stored.decode::<TestEvent>(),
            Err(EventError::DeserializationError(_))
        ));
    }

    #[test]
    fn stored_event_display() {
        let stored = StoredEvent {
            version: Version::new(7),
            timestamp: at(),
            event_type: "X.v1".to_string(),
            data: vec![1, 2, 3],
        };
        let display = stored.to_string();
        assert!(display.contains("X.v1"));
        assert!(display.contains("3 bytes"));
    }
}
