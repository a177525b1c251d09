//! # Component Registry
//!
//! Components are *named* slots of a registered type: two `float3` fields
//! called `position` and `velocity` are distinct components that share one
//! [`TypeID`]. This module derives [`ComponentID`]s from `(type, name)` and
//! keeps the declarations needed for diagnostics and name resolution.
//!
//! ## Design
//! - `ComponentID = (hash(name) << 32) | type_id`, so the id alone recovers
//!   both the type and the name hash.
//! - The registry is an owned value inside the manager, populated during an
//!   explicit startup phase.
//!
//! ## Invariants
//! - A [`ComponentID`] maps to at most one [`TypeID`], enforced at registration.

use std::collections::HashMap;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::hash::fnv_hash_str;
use crate::engine::types::{component_id, type_id_of_component, ComponentID, NameHash, TypeID};

/// Metadata for one registered component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDeclaration {
    /// Component identifier.
    pub component_id: ComponentID,
    /// Type stored by the component.
    pub type_id: TypeID,
    /// Field name of the component.
    pub name: String,
}

impl ComponentDeclaration {
    /// Hash of the component's name.
    #[inline]
    pub fn name_hash(&self) -> NameHash {
        fnv_hash_str(&self.name)
    }
}

impl std::fmt::Display for ComponentDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#x}, type {:#x})", self.name, self.component_id, self.type_id)
    }
}

/// Derives the component id for `name` of type `type_id`.
#[inline]
pub fn component_id_of(type_id: TypeID, name: &str) -> ComponentID {
    component_id(type_id, fnv_hash_str(name))
}

/// Table of every declared component.
#[derive(Default, Debug)]
pub struct ComponentRegistry {
    by_id: HashMap<ComponentID, ComponentDeclaration>,
    by_name: HashMap<String, Vec<ComponentID>>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` of type `type_id`, returning its id.
    ///
    /// ## Behavior
    /// - Registering the same `(type, name)` again returns the existing id.
    /// - Because the type id is embedded in the component id, a clash can only
    ///   come from a name-hash collision; it is rejected.

    pub fn get_or_add(&mut self, type_id: TypeID, name: &str) -> EcsResult<ComponentID> {
        let id = component_id_of(type_id, name);
        if let Some(existing) = self.by_id.get(&id) {
            if existing.type_id != type_id || existing.name != name {
                return Err(EcsError::ConflictingComponentRegistration {
                    component_id: id,
                    existing: existing.type_id,
                });
            }
            return Ok(id);
        }
        self.by_id.insert(
            id,
            ComponentDeclaration { component_id: id, type_id, name: name.to_owned() },
        );
        self.by_name.entry(name.to_owned()).or_default().push(id);
        Ok(id)
    }

    /// Returns the declaration of a component.
    #[inline]
    pub fn get(&self, component_id: ComponentID) -> Option<&ComponentDeclaration> {
        self.by_id.get(&component_id)
    }

    /// Returns `true` if the component is registered.
    #[inline]
    pub fn contains(&self, component_id: ComponentID) -> bool {
        self.by_id.contains_key(&component_id)
    }

    /// Returns the type stored by a component, whether or not it is registered.
    #[inline]
    pub fn type_of(&self, component_id: ComponentID) -> TypeID {
        type_id_of_component(component_id)
    }

    /// Returns every component registered under `name`, across all types.
    pub fn find_by_name(&self, name: &str) -> &[ComponentID] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns the name of a component, or a placeholder for unknown ids.
    pub fn name_of(&self, component_id: ComponentID) -> &str {
        self.get(component_id).map_or("<unknown>", |d| d.name.as_str())
    }

    /// Iterates every declaration.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentDeclaration> {
        self.by_id.values()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no component is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_different_names_are_distinct() {
        let mut registry = ComponentRegistry::new();
        let position = registry.get_or_add(7, "position").unwrap();
        let velocity = registry.get_or_add(7, "velocity").unwrap();
        assert_ne!(position, velocity);
        assert_eq!(registry.type_of(position), 7);
        assert_eq!(registry.type_of(velocity), 7);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let a = registry.get_or_add(3, "health").unwrap();
        let b = registry.get_or_add(3, "health").unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_name("health"), &[a]);
    }
}
