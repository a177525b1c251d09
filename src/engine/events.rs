//! Event types and type-erased event payloads.
//!
//! An event is any `Send + Sync` value whose type implements [`EventType`].
//! Handlers subscribe to event ids and receive an [`Event`] view that can be
//! checked and cast back to the concrete payload.
//!
//! Three events are raised by the engine itself:
//!
//! | Event | Raised |
//! |-------|--------|
//! | [`OnAppear`] | after an entity's storage has been written |
//! | [`OnDisappear`] | before an entity's storage is removed |
//! | [`OnTrack`] | when the tracking pass finds a changed tracked component |

use std::any::Any;
use std::fmt;

use crate::engine::entity::EntityId;
use crate::engine::hash::fnv_hash_str;
use crate::engine::types::{EventID, TrackMask};

/// A type that can be sent as an event.
///
/// ```ignore
/// struct Explode { radius: f32 }
/// impl EventType for Explode {
///     const NAME: &'static str = "Explode";
/// }
/// ```

pub trait EventType: Any + Send + Sync {
    /// Stable event name.
    const NAME: &'static str;
    /// Event id, the hash of [`EventType::NAME`].
    const ID: EventID = fnv_hash_str(Self::NAME);
}

/// Raised for an entity once its components have been written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OnAppear;

impl EventType for OnAppear {
    const NAME: &'static str = "OnAppear";
}

/// Raised for an entity right before its components are destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OnDisappear;

impl EventType for OnDisappear {
    const NAME: &'static str = "OnDisappear";
}

/// Raised for an entity whose tracked components changed value.
///
/// `mask` has one bit per tracked column of the entity's archetype that the
/// receiving handler observes and that actually changed.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OnTrack {
    /// Changed tracked columns.
    pub mask: TrackMask,
}

impl EventType for OnTrack {
    const NAME: &'static str = "OnTrack";
}

/// Borrowed, type-erased event payload.
#[derive(Clone, Copy)]
pub struct Event<'a> {
    id: EventID,
    name: &'static str,
    payload: &'a (dyn Any + Send + Sync),
}

impl<'a> Event<'a> {
    /// Wraps a typed event.
    pub fn new<E: EventType>(event: &'a E) -> Self {
        Self { id: E::ID, name: E::NAME, payload: event }
    }

    /// Event id.
    #[inline]
    pub fn id(&self) -> EventID {
        self.id
    }

    /// Event name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if the payload is an `E`.
    #[inline]
    pub fn is<E: EventType>(&self) -> bool {
        self.payload.is::<E>()
    }

    /// Casts the payload back to `E`.
    #[inline]
    pub fn cast<E: EventType>(&self) -> Option<&'a E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("id", &self.id).field("name", &self.name).finish()
    }
}

/// An owned event waiting in the deferred queue.
pub(crate) struct QueuedEvent {
    pub(crate) id: EventID,
    pub(crate) name: &'static str,
    pub(crate) target: Option<EntityId>,
    pub(crate) payload: Box<dyn Any + Send + Sync>,
}

impl QueuedEvent {
    pub(crate) fn new<E: EventType>(target: Option<EntityId>, event: E) -> Self {
        Self { id: E::ID, name: E::NAME, target, payload: Box::new(event) }
    }

    pub(crate) fn as_event(&self) -> Event<'_> {
        Event { id: self.id, name: self.name, payload: self.payload.as_ref() }
    }
}
