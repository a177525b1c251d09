//! ECS System and Event Handler Abstractions
//!
//! A **system** is a query plus an update callback that runs once per tick
//! over every chunk of every archetype the query matched. An **event
//! handler** is a query plus broadcast/unicast callbacks that run when a
//! subscribed event is dispatched.
//!
//! ## Callback model
//!
//! Callbacks receive:
//!
//! - a [`ChunkView`] producing typed cursors for the query's signature slots,
//! - a [`Commands`] handle for deferred structural changes and events.
//!
//! Structural mutation during iteration is impossible by construction: the
//! callbacks only ever see [`Commands`], which queues creations, destructions
//! and events until the next flush.
//!
//! ## Function-backed callbacks
//!
//! [`FnSystem`] and [`FnEventHandler`] wrap closures so that most logic needs
//! no dedicated type:
//!
//! ```ignore
//! ecs.register_system(
//!     QueryDescription::new("gravity").write::<Float3>("velocity"),
//!     FnSystem::new(|view, _commands| {
//!         let mut velocity = view.write::<Float3>(0);
//!         for row in 0..view.len() {
//!             if let Some(v) = velocity.get_mut(row) { v.y -= 9.81 * DT; }
//!         }
//!     }),
//! );
//! ```

use crate::engine::commands::Commands;
use crate::engine::events::{Event, EventType, OnTrack};
use crate::engine::query::{ChunkView, ComponentSelector, Query, QueryDescription};
use crate::engine::types::{ComponentID, EventID};

/// Per-tick logic over the chunks matched by a query.
pub trait System: Send {
    /// Processes one chunk.
    fn update(&mut self, view: &ChunkView<'_>, commands: &mut Commands<'_>);
}

/// A [`System`] backed by a closure.
pub struct FnSystem<F>
where
    F: FnMut(&ChunkView<'_>, &mut Commands<'_>) + Send,
{
    f: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&ChunkView<'_>, &mut Commands<'_>) + Send,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&ChunkView<'_>, &mut Commands<'_>) + Send,
{
    fn update(&mut self, view: &ChunkView<'_>, commands: &mut Commands<'_>) {
        (self.f)(view, commands)
    }
}

/// Logic run when a subscribed event is dispatched.
///
/// `broadcast` receives whole chunks; `unicast` receives a single-row view of
/// the targeted entity and defaults to `broadcast`.

pub trait EventHandler: Send {
    /// Handles an event sent to every matching entity.
    fn broadcast(&mut self, view: &ChunkView<'_>, event: &Event<'_>, commands: &mut Commands<'_>);

    /// Handles an event sent to one entity.
    fn unicast(&mut self, view: &ChunkView<'_>, event: &Event<'_>, commands: &mut Commands<'_>) {
        self.broadcast(view, event, commands)
    }
}

/// An [`EventHandler`] backed by a closure used for both entry points.
pub struct FnEventHandler<F>
where
    F: FnMut(&ChunkView<'_>, &Event<'_>, &mut Commands<'_>) + Send,
{
    f: F,
}

impl<F> FnEventHandler<F>
where
    F: FnMut(&ChunkView<'_>, &Event<'_>, &mut Commands<'_>) + Send,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: FnMut(&ChunkView<'_>, &Event<'_>, &mut Commands<'_>) + Send,
{
    fn broadcast(&mut self, view: &ChunkView<'_>, event: &Event<'_>, commands: &mut Commands<'_>) {
        (self.f)(view, event, commands)
    }
}

/// Description of an event handler: its query, subscribed events and
/// observed tracked components.
#[derive(Clone, Debug)]
pub struct EventHandlerDescription {
    query: QueryDescription,
    events: Vec<EventID>,
    tracked: Vec<ComponentSelector>,
}

impl EventHandlerDescription {
    /// Starts a handler over `query` with no subscriptions.
    pub fn new(query: QueryDescription) -> Self {
        Self { query, events: Vec::new(), tracked: Vec::new() }
    }

    /// Subscribes to events of type `E`.
    pub fn on<E: EventType>(self) -> Self {
        self.on_id(E::ID)
    }

    /// Subscribes to an event id.
    pub fn on_id(mut self, event: EventID) -> Self {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    /// Observes changes of tracked component `name` of type `T`.
    ///
    /// Observing any component subscribes the handler to [`OnTrack`].
    pub fn track<T: 'static>(mut self, name: &str) -> Self {
        self.tracked.push(ComponentSelector::of::<T>(name));
        self.on::<OnTrack>()
    }

    /// Handler name.
    pub fn name(&self) -> &str {
        self.query.name()
    }

    pub(crate) fn into_parts(self) -> (QueryDescription, Vec<EventID>, Vec<ComponentSelector>) {
        (self.query, self.events, self.tracked)
    }
}

/// A system with its compiled query.
pub(crate) struct RegisteredSystem {
    pub(crate) query: Query,
    pub(crate) system: Box<dyn System>,
}

/// An event handler with its compiled query and subscriptions.
pub(crate) struct RegisteredHandler {
    pub(crate) query: Query,
    #[allow(dead_code)] // stored alongside handler_order; see REVIEW_FINDINGS F5
    pub(crate) events: Vec<EventID>,
    pub(crate) tracked: Vec<ComponentID>,
    pub(crate) handler: Box<dyn EventHandler>,
}
