//! Error types for registration, entity creation and scheduling.
//!
//! The engine favours degraded-but-running behaviour: almost every failure is
//! logged and the operation falls back to an invalid handle, a skipped row or
//! a default-constructed slot. This module still models each failure as a
//! structured value so that the fallible `try_*` entry points can return it
//! and the log-and-continue wrappers can print a consistent message.
//!
//! ## Typical flow
//! Low-level lookups return [`EcsError`] through `?`; the public, degraded
//! entry point on the manager logs the error with `log::error!` and returns
//! its fallback value.
//!
//! ```ignore
//! pub fn create_entity(&mut self, template: TemplateID, init: InitializerList) -> EntityId {
//!     match self.try_create_entity(template, init) {
//!         Ok(eid) => eid,
//!         Err(err) => {
//!             log::error!("create_entity failed: {err}");
//!             EntityId::INVALID
//!         }
//!     }
//! }
//! ```
//!
//! ## Display vs. Debug
//! * `Display` is short and suitable for operator logs.
//! * `Debug` (derived) retains the full structure.

use thiserror::Error;

use crate::engine::entity::EntityId;
use crate::engine::types::{ArchetypeID, ComponentID, TemplateID, TypeID};

/// Returned when the entity container cannot hand out another index.
///
/// ### Fields
/// * `entities_needed` — Total number of live indices the operation required.
/// * `capacity` — Maximum number of indices an [`EntityId`] can address.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("entity limit reached ({entities_needed} needed; capacity {capacity})")]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,

    /// Current capacity limiting the operation.
    pub capacity: u64,
}

/// Aggregate error for every fallible engine operation.
///
/// ### Variants
/// * lookup failures (`UnknownTemplate`, `UnknownArchetype`, `UnknownType`,
///   `UnknownComponent`, `StaleEntity`),
/// * type disagreements (`TypeMismatch`, `ConflictingTypeRegistration`,
///   `RustTypeAlreadyBound`, `ConflictingComponentRegistration`),
/// * resource limits (`Capacity`),
/// * configuration problems (`InvalidLayout`, `InvalidSignature`,
///   `SchedulingCycle`).

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// No template is registered under the given id.
    #[error("template {0:#x} not found")]
    UnknownTemplate(TemplateID),

    /// No archetype is registered under the given id.
    #[error("archetype {0:#x} not found")]
    UnknownArchetype(ArchetypeID),

    /// No type declaration exists for the given type id.
    #[error("type {0:#x} not found")]
    UnknownType(TypeID),

    /// A Rust type was used that was never registered.
    #[error("type `{0}` is not registered")]
    UnregisteredType(&'static str),

    /// No component is registered under the given name or id.
    #[error("component `{0}` not found")]
    UnknownComponent(String),

    /// A value's type disagrees with the component's declared type.
    #[error("component `{component}` has type `{found}` but expected `{expected}`")]
    TypeMismatch {
        /// Component name.
        component: String,
        /// Declared type name.
        expected: String,
        /// Supplied type name.
        found: String,
    },

    /// Two different Rust types hash to the same type id.
    #[error("type `{name}` ({type_id:#x}) is already registered with a different Rust type")]
    ConflictingTypeRegistration {
        /// Registered name.
        name: String,
        /// Hash of the name.
        type_id: TypeID,
    },

    /// A Rust type is already registered under a different name.
    #[error("`{rust_type}` is already registered as type `{existing}`, can't register it as `{requested}`")]
    RustTypeAlreadyBound {
        /// Rust type name.
        rust_type: &'static str,
        /// Name the type is bound to.
        existing: String,
        /// Name that was refused.
        requested: String,
    },

    /// A component id was registered again with a different type.
    #[error("component {component_id:#x} is already registered with type {existing:#x}")]
    ConflictingComponentRegistration {
        /// Offending component id.
        component_id: ComponentID,
        /// Type already bound to the component id.
        existing: TypeID,
    },

    /// A column's chunk layout cannot be represented.
    #[error("component `{0}` has an invalid chunk layout")]
    InvalidLayout(String),

    /// A query signature lists a component twice or writes a read-only component.
    #[error("query `{query}` has an invalid signature: {reason}")]
    InvalidSignature {
        /// Query name.
        query: String,
        /// What is wrong with the signature.
        reason: String,
    },

    /// The component may be read but never written by callers.
    #[error("component `{0}` is read-only")]
    ReadOnlyComponent(String),

    /// The handle does not refer to an accessible entity.
    #[error("stale or dead entity reference {0:?}")]
    StaleEntity(EntityId),

    /// The entity container is full.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Dependency ordering found one or more cycles and the policy rejects them.
    #[error("scheduling cycle detected: {}", format_cycles(.0))]
    SchedulingCycle(Vec<Vec<String>>),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used by every fallible engine operation.
pub type EcsResult<T> = Result<T, EcsError>;
