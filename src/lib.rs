//! # Archetype ECS
//!
//! Archetype-based Entity-Component-System engine for simulations that
//! process large numbers of homogeneous entities per tick.
//!
//! ## Design Goals
//! - Chunked, column-per-component storage for cache efficiency
//! - Runtime type registration with explicit lifecycle operations
//! - Cached query matching over archetypes
//! - Change tracking by shadow comparison
//! - Deterministic, dependency-ordered scheduling
//! - Deferred structural changes applied at explicit flush points

#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(dead_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::manager::{
    EcsManager,
    HandlerId,
    Plugin,
    QueryId,
    SystemId,
};

pub use engine::config::{
    CyclePolicy,
    EcsConfig,
    Verbosity,
};

pub use engine::type_registry::{
    TypeDeclaration,
    TypeRegistry,
};

pub use engine::component::{
    component_id_of,
    ComponentRegistry,
};

pub use engine::entity::{
    EntityId,
    EntityState,
    ENTITY_ID_COMPONENT,
    ENTITY_ID_COMPONENT_NAME,
};

pub use engine::archetype::Archetype;

pub use engine::template::{
    Template,
    TemplateDescription,
};

pub use engine::value::{
    ComponentKey,
    InitializerList,
    InitializerSoaList,
};

pub use engine::query::{
    ChunkView,
    ColumnCursor,
    ColumnCursorMut,
    ComponentSelector,
    Query,
    QueryDescription,
};

pub use engine::events::{
    Event,
    EventType,
    OnAppear,
    OnDisappear,
    OnTrack,
};

pub use engine::systems::{
    EventHandler,
    EventHandlerDescription,
    FnEventHandler,
    FnSystem,
    System,
};

pub use engine::commands::Commands;

pub use engine::scheduler::SortReport;

pub use engine::error::{
    CapacityError,
    EcsError,
    EcsResult,
};

pub use engine::types::{
    ArchetypeChunkSize,
    ArchetypeID,
    ComponentAccess,
    ComponentID,
    EventID,
    RowID,
    TemplateID,
    TrackMask,
    TypeID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use archetype_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ArchetypeChunkSize,
        ChunkView,
        Commands,
        EcsConfig,
        EcsManager,
        EntityId,
        Event,
        EventHandlerDescription,
        EventType,
        FnEventHandler,
        FnSystem,
        InitializerList,
        InitializerSoaList,
        OnAppear,
        OnDisappear,
        OnTrack,
        QueryDescription,
        TemplateDescription,
        TypeDeclaration,
    };
}
