//! # Commands
//!
//! Deferred entity creation, destruction and event dispatch.
//!
//! ## Purpose
//! A system iterating an archetype's chunks must never see that archetype's
//! row count change underneath it. Callbacks therefore mutate structure only
//! through [`Commands`], which records operations in a [`DeferredQueue`]
//! drained by the manager at an explicit flush.
//!
//! ## Handles
//! Deferred creation hands out a real handle immediately, in the
//! `AsyncCreation` state. The handle is usable as an event target and can be
//! destroyed again before the flush, in which case the creation is skipped.
//!
//! ## Ordering
//! - Within one flush, destructions are applied before creations.
//! - Each group is applied in the order it was queued.
//! - Operations queued while a flush runs are applied at the next flush.

use log::{error, warn};

use crate::engine::entity::{DestroyMark, EntityContainer, EntityId, EntityState};
use crate::engine::error::EcsResult;
use crate::engine::events::{EventType, QueuedEvent};
use crate::engine::template::TemplateRegistry;
use crate::engine::types::TemplateID;
use crate::engine::value::{InitializerList, InitializerSoaList};

/// A queued entity creation.
pub(crate) enum DeferredCreation {
    /// One entity with per-entity overrides.
    Single {
        entity: EntityId,
        template: TemplateID,
        init: InitializerList,
    },
    /// A batch sharing one template, with column-wise overrides.
    Batch {
        entities: Vec<EntityId>,
        template: TemplateID,
        init: InitializerSoaList,
    },
}

/// Operations waiting for the next flush.
#[derive(Default)]
pub(crate) struct DeferredQueue {
    pub(crate) destructions: Vec<EntityId>,
    pub(crate) creations: Vec<DeferredCreation>,
    pub(crate) events: Vec<QueuedEvent>,
}

impl DeferredQueue {
    pub(crate) fn has_entity_work(&self) -> bool {
        !self.destructions.is_empty() || !self.creations.is_empty()
    }
}

/// Clamps a batch size to the shortest column of `init`.
pub(crate) fn batch_count(template: TemplateID, count: usize, init: &InitializerSoaList) -> usize {
    if init.is_empty() || init.batch_len() >= count {
        return count;
    }
    warn!(
        "create_entities for template {template:#x}: {count} entities requested but the shortest column holds {}, creating {}",
        init.batch_len(),
        init.batch_len()
    );
    init.batch_len()
}

/// Deferred mutation surface handed to systems and event handlers.
pub struct Commands<'w> {
    entities: &'w mut EntityContainer,
    queue: &'w mut DeferredQueue,
    templates: &'w TemplateRegistry,
}

impl<'w> Commands<'w> {
    pub(crate) fn new(
        entities: &'w mut EntityContainer,
        queue: &'w mut DeferredQueue,
        templates: &'w TemplateRegistry,
    ) -> Self {
        Self { entities, queue, templates }
    }

    /// Queues the creation of one entity and returns its `AsyncCreation` handle.
    ///
    /// ## Errors
    /// - [`EcsError::UnknownTemplate`](crate::engine::error::EcsError::UnknownTemplate)
    /// - [`EcsError::Capacity`](crate::engine::error::EcsError::Capacity)

    pub fn try_create_entity(&mut self, template: TemplateID, init: InitializerList) -> EcsResult<EntityId> {
        self.templates.require(template)?;
        let entity = self.entities.allocate(EntityState::AsyncCreation)?;
        self.queue.creations.push(DeferredCreation::Single { entity, template, init });
        Ok(entity)
    }

    /// Like [`Commands::try_create_entity`], logging failures and returning
    /// [`EntityId::INVALID`].
    pub fn create_entity(&mut self, template: TemplateID, init: InitializerList) -> EntityId {
        self.try_create_entity(template, init).unwrap_or_else(|err| {
            error!("create_entity (deferred) failed: {err}");
            EntityId::INVALID
        })
    }

    /// Queues the creation of `count` entities and returns their handles.
    ///
    /// When `init` is non-empty, `count` is clamped to its shortest column.
    /// On capacity exhaustion the handles allocated so far are released again.

    pub fn try_create_entities(
        &mut self,
        template: TemplateID,
        count: usize,
        init: InitializerSoaList,
    ) -> EcsResult<Vec<EntityId>> {
        self.templates.require(template)?;
        let count = batch_count(template, count, &init);
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            match self.entities.allocate(EntityState::AsyncCreation) {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    for entity in entities {
                        self.entities.destroy(entity);
                    }
                    return Err(err.into());
                }
            }
        }
        if !entities.is_empty() {
            self.queue.creations.push(DeferredCreation::Batch { entities: entities.clone(), template, init });
        }
        Ok(entities)
    }

    /// Like [`Commands::try_create_entities`], logging failures and returning no handles.
    pub fn create_entities(&mut self, template: TemplateID, count: usize, init: InitializerSoaList) -> Vec<EntityId> {
        self.try_create_entities(template, count, init).unwrap_or_else(|err| {
            error!("create_entities (deferred) failed: {err}");
            Vec::new()
        })
    }

    /// Queues the destruction of `entity`.
    ///
    /// ## Behavior
    /// - An `Alive` entity becomes `AsyncDestroy`; its data stays readable
    ///   until the flush.
    /// - An entity still waiting for its deferred creation is dropped at once
    ///   and its creation is skipped.
    ///
    /// Returns `false` for stale handles and entities already scheduled.

    pub fn destroy_entity(&mut self, entity: EntityId) -> bool {
        match self.entities.mark_as_destroyed(entity) {
            DestroyMark::Pending => {
                self.queue.destructions.push(entity);
                true
            }
            DestroyMark::Collapsed => true,
            DestroyMark::Ignored => false,
        }
    }

    /// Queues `event` for every subscribed handler.
    pub fn send_event<E: EventType>(&mut self, event: E) {
        self.queue.events.push(QueuedEvent::new(None, event));
    }

    /// Queues `event` for `target` only.
    pub fn send_event_to<E: EventType>(&mut self, target: EntityId, event: E) {
        self.queue.events.push(QueuedEvent::new(Some(target), event));
    }

    /// Returns `true` if `entity` exists and is not scheduled for removal.
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns `true` if `entity`'s data can be read.
    #[inline]
    pub fn can_access(&self, entity: EntityId) -> bool {
        self.entities.can_access(entity)
    }

    /// Lifecycle state of `entity`.
    #[inline]
    pub fn state(&self, entity: EntityId) -> EntityState {
        self.entities.state(entity)
    }
}
