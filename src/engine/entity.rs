//! Generation-checked entity handles and the entity container.
//!
//! An [`EntityId`] packs a 24-bit index and an 8-bit generation. The
//! [`EntityContainer`] maps each index to the entity's current location
//! `(archetype, row)`, its generation and its lifecycle state.
//!
//! ## Lifecycle
//!
//! ```text
//!            allocate(AsyncCreation)        mutate
//!   Dead ───────────────────────────► AsyncCreation ─────────► Alive
//!    ▲  ▲                                  │                     │
//!    │  └──────── mark_as_destroyed ───────┘                     │ mark_as_destroyed
//!    │                                                           ▼
//!    └──────────────────────── destroy ◄──────────────────── AsyncDestroy
//! ```
//!
//! Synchronous creation allocates straight into `Alive`; synchronous
//! destruction goes straight from `Alive` to `Dead` through [`EntityContainer::destroy`].
//!
//! ## Invariants
//! - The generation of an index only advances when that exact index is
//!   destroyed, and wraps within 8 bits. A handle compared against a newer
//!   generation is stale; wraparound after 256 reuses of one index is an
//!   accepted risk at this width.
//! - `can_access` holds in `Alive` and `AsyncDestroy` (storage holds valid data).
//! - `is_alive` holds in `AsyncCreation` and `Alive` (the entity exists or is
//!   about to, and is not scheduled for removal).

use std::fmt;

use crate::engine::error::CapacityError;
use crate::engine::hash::fnv_hash_str;
use crate::engine::types::{component_id, ArchetypeID, ComponentID, RowID};

const INDEX_BITS: u32 = 24;
const GENERATION_BITS: u32 = 8;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Number of addressable entity indices.
pub const MAX_ENTITIES_COUNT: u32 = 1 << INDEX_BITS;

/// Number of distinct generations per index.
pub const MAX_GENERATIONS_COUNT: u32 = 1 << GENERATION_BITS;

/// Mask applied when advancing a generation.
pub const GENERATIONS_MASK: u32 = MAX_GENERATIONS_COUNT - 1;

/// Name under which [`EntityId`] is registered as a component type.
pub const ENTITY_ID_TYPE_NAME: &str = "EntityId";

/// Name of the component every template carries to record its own handle.
pub const ENTITY_ID_COMPONENT_NAME: &str = "eid";

/// Component id of the `eid` component.
pub const ENTITY_ID_COMPONENT: ComponentID =
    component_id(fnv_hash_str(ENTITY_ID_TYPE_NAME), fnv_hash_str(ENTITY_ID_COMPONENT_NAME));

/// Handle to an entity: `(generation << 24) | index`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

impl EntityId {
    /// The invalid handle: last index, last generation. Never handed out.
    pub const INVALID: EntityId = EntityId::new(MAX_ENTITIES_COUNT - 1, GENERATIONS_MASK);

    /// Packs an index and a generation.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        EntityId(((generation & GENERATIONS_MASK) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Array position of the entity.
    #[inline] pub const fn index(self) -> u32 { self.0 & INDEX_MASK }
    /// Generation stamp of the handle.
    #[inline] pub const fn generation(self) -> u32 { self.0 >> INDEX_BITS }
    /// Raw packed representation.
    #[inline] pub const fn to_bits(self) -> u32 { self.0 }
    /// Returns `false` for [`EntityId::INVALID`].
    #[inline] pub const fn is_valid(self) -> bool { self.0 != Self::INVALID.0 }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        } else {
            f.write_str("EntityId(invalid)")
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Lifecycle state of an entity index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EntityState {
    /// Free; the index may be recycled.
    #[default]
    Dead,
    /// A handle exists but storage has not been written yet (deferred create).
    AsyncCreation,
    /// Storage holds the entity and it is fully accessible.
    Alive,
    /// Storage still holds valid data pending a deferred removal.
    AsyncDestroy,
}

#[derive(Clone, Copy, Debug, Default)]
struct EntityRecord {
    archetype: ArchetypeID,
    row: RowID,
    generation: u32,
    state: EntityState,
}

/// Outcome of [`EntityContainer::mark_as_destroyed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyMark {
    /// The entity had storage; it is now `AsyncDestroy` and awaits removal.
    Pending,
    /// The entity was never materialised; it collapsed straight to `Dead`.
    Collapsed,
    /// Stale handle or already scheduled; nothing changed.
    Ignored,
}

/// Generation-stamped table mapping handles to storage locations.
#[derive(Default, Debug)]
pub struct EntityContainer {
    records: Vec<EntityRecord>,
    free_indices: Vec<u32>,
}

impl EntityContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn record(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.records
            .get(entity.index() as usize)
            .filter(|record| record.generation == entity.generation())
    }

    #[inline]
    fn record_mut(&mut self, entity: EntityId) -> Option<&mut EntityRecord> {
        self.records
            .get_mut(entity.index() as usize)
            .filter(|record| record.generation == entity.generation())
    }

    /// Hands out a fresh or recycled handle in `state`.
    ///
    /// ## Behavior
    /// - Recycles the most recently freed index first.
    /// - The returned handle carries the index's current generation.
    ///
    /// ## Errors
    /// [`CapacityError`] once every addressable index is in use.

    pub fn allocate(&mut self, state: EntityState) -> Result<EntityId, CapacityError> {
        debug_assert!(matches!(state, EntityState::AsyncCreation | EntityState::Alive));

        if let Some(index) = self.free_indices.pop() {
            let record = &mut self.records[index as usize];
            record.state = state;
            record.archetype = 0;
            record.row = 0;
            return Ok(EntityId::new(index, record.generation));
        }

        // The last index is reserved for `EntityId::INVALID`.
        let index = self.records.len() as u32;
        if index >= MAX_ENTITIES_COUNT - 1 {
            return Err(CapacityError {
                entities_needed: index as u64 + 1,
                capacity: (MAX_ENTITIES_COUNT - 1) as u64,
            });
        }
        self.records.push(EntityRecord { archetype: 0, row: 0, generation: 0, state });
        Ok(EntityId::new(index, 0))
    }

    /// Records the storage location of `entity` and makes it `Alive`.
    ///
    /// ## Behavior
    /// - `AsyncCreation` transitions to `Alive`; `Alive` stays `Alive`.
    /// - Returns `false` if the handle is stale or the entity is in any other state,
    ///   e.g. it was destroyed before it was ever materialised.

    pub fn mutate(&mut self, entity: EntityId, archetype: ArchetypeID, row: RowID) -> bool {
        match self.record_mut(entity) {
            Some(record) if matches!(record.state, EntityState::AsyncCreation | EntityState::Alive) => {
                record.archetype = archetype;
                record.row = row;
                record.state = EntityState::Alive;
                true
            }
            _ => false,
        }
    }

    /// Updates the row of an entity whose data was relocated by a swap-and-pop.
    pub(crate) fn relocate(&mut self, entity: EntityId, row: RowID) -> bool {
        match self.record_mut(entity) {
            Some(record) if matches!(record.state, EntityState::Alive | EntityState::AsyncDestroy) => {
                record.row = row;
                true
            }
            _ => false,
        }
    }

    /// Schedules `entity` for destruction.
    ///
    /// ## Behavior
    /// - `Alive` becomes `AsyncDestroy`; storage is untouched until the flush.
    /// - `AsyncCreation` collapses directly to `Dead` (generation bumped,
    ///   index recycled); the pending creation is skipped at flush time.

    pub fn mark_as_destroyed(&mut self, entity: EntityId) -> DestroyMark {
        let state = match self.record(entity) {
            Some(record) => record.state,
            None => return DestroyMark::Ignored,
        };
        match state {
            EntityState::Alive => {
                if let Some(record) = self.record_mut(entity) {
                    record.state = EntityState::AsyncDestroy;
                }
                DestroyMark::Pending
            }
            EntityState::AsyncCreation => {
                self.destroy(entity);
                DestroyMark::Collapsed
            }
            EntityState::AsyncDestroy | EntityState::Dead => DestroyMark::Ignored,
        }
    }

    /// Frees `entity`: bumps the generation and recycles the index.
    ///
    /// Returns `false` for stale handles or indices that are already `Dead`.

    pub fn destroy(&mut self, entity: EntityId) -> bool {
        let index = entity.index();
        let Some(record) = self.record_mut(entity) else {
            return false;
        };
        if record.state == EntityState::Dead {
            return false;
        }
        record.generation = (record.generation + 1) & GENERATIONS_MASK;
        record.state = EntityState::Dead;
        self.free_indices.push(index);
        true
    }

    /// Returns `true` if storage holds valid data for `entity` (`Alive` or `AsyncDestroy`).
    #[inline]
    pub fn can_access(&self, entity: EntityId) -> bool {
        self.record(entity)
            .is_some_and(|r| matches!(r.state, EntityState::Alive | EntityState::AsyncDestroy))
    }

    /// Returns `true` if `entity` exists and is not scheduled for removal
    /// (`AsyncCreation` or `Alive`).
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.record(entity)
            .is_some_and(|r| matches!(r.state, EntityState::AsyncCreation | EntityState::Alive))
    }

    /// Returns the state of `entity`, or `Dead` for stale handles.
    #[inline]
    pub fn state(&self, entity: EntityId) -> EntityState {
        self.record(entity).map_or(EntityState::Dead, |r| r.state)
    }

    /// Returns `(archetype, row)` of an accessible entity.
    #[inline]
    pub fn get(&self, entity: EntityId) -> Option<(ArchetypeID, RowID)> {
        self.record(entity)
            .filter(|r| matches!(r.state, EntityState::Alive | EntityState::AsyncDestroy))
            .map(|r| (r.archetype, r.row))
    }

    /// Number of entities that are not `Dead`.
    pub fn len(&self) -> usize {
        self.records.len() - self.free_indices.len()
    }

    /// Returns `true` if no entity exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
