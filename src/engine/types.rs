//! Core identifiers and shared enums for the archetype storage engine.
//!
//! This module defines the primitive id types used throughout the engine,
//! the packing scheme that turns a `(type, name)` pair into a [`ComponentID`],
//! chunk-size presets for archetypes, and the per-component access modes used
//! by query signatures.
//!
//! ## Design Philosophy
//!
//! Every identifier is a plain integer derived from a stable name hash
//! (see [`crate::engine::hash`]). Nothing here depends on registration order,
//! so ids computed on one run are identical on the next.
//!
//! ## Invariants
//!
//! - The low 32 bits of a [`ComponentID`] always equal the component's
//!   [`TypeID`]; the high 32 bits always equal the hash of its name.
//! - Chunk sizes are powers of two, so row addressing is a shift and a mask.

/// Stable hash of a registered type name.
pub type TypeID = u32;

/// Hash of a component, template, query or handler name.
pub type NameHash = u32;

/// Identifier of a named component slot: `(name_hash << 32) | type_id`.
pub type ComponentID = u64;

/// Order-independent fold of an archetype's `(ComponentID, tracked)` set.
pub type ArchetypeID = u32;

/// Hash of a template name.
pub type TemplateID = u32;

/// Hash of an event type name.
pub type EventID = u32;

/// Logical row of an entity inside its archetype.
pub type RowID = u32;

/// Per-row bitmask of tracked columns that changed during a tracking pass.
pub type TrackMask = u32;

/// Maximum number of tracked columns a single archetype can report in a [`TrackMask`].
pub const MAX_TRACKED_COMPONENTS: usize = TrackMask::BITS as usize;

/// Packs a type id and a name hash into a [`ComponentID`].

#[inline]
pub const fn component_id(type_id: TypeID, name_hash: NameHash) -> ComponentID {
    ((name_hash as ComponentID) << 32) | (type_id as ComponentID)
}

/// Recovers the [`TypeID`] stored in the low bits of a component id.
#[inline]
pub const fn type_id_of_component(component_id: ComponentID) -> TypeID {
    (component_id & 0xFFFF_FFFF) as TypeID
}

/// Recovers the name hash stored in the high bits of a component id.
#[inline]
pub const fn name_hash_of_component(component_id: ComponentID) -> NameHash {
    (component_id >> 32) as NameHash
}

/// Power-of-two chunk size preset, chosen per archetype at creation.
///
/// ## Purpose
/// Small archetypes (a handful of unique entities) waste memory with large
/// chunks; bulk archetypes want long contiguous runs. The preset is fixed for
/// the lifetime of the archetype.
///
/// The discriminant is the power: a chunk holds `1 << power` rows.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ArchetypeChunkSize {
    /// 32 rows per chunk.
    Dozens = 5,
    /// 256 rows per chunk.
    Medium = 8,
    /// 1024 rows per chunk.
    #[default]
    Thousands = 10,
}

impl ArchetypeChunkSize {
    /// Returns the shift used to map a row onto its chunk.
    #[inline]
    pub const fn power(self) -> u32 {
        self as u32
    }

    /// Returns the number of rows per chunk.
    #[inline]
    pub const fn rows(self) -> u32 {
        1 << self.power()
    }

    /// Returns the mask used to map a row onto its offset within a chunk.
    #[inline]
    pub const fn mask(self) -> u32 {
        self.rows() - 1
    }
}

/// How a query signature entry accesses its component.
///
/// `ReadCopy` hands the callback a value it may copy out; `ReadOnly` a shared
/// cursor; `ReadWrite` a mutable cursor whose writes mark tracked columns
/// dirty. The optional variants match archetypes that lack the component,
/// presenting an empty cursor instead.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentAccess {
    /// Read by value.
    ReadCopy,
    /// Shared read access.
    ReadOnly,
    /// Exclusive write access.
    ReadWrite,
    /// Shared read access; the component may be absent.
    ReadOnlyOptional,
    /// Exclusive write access; the component may be absent.
    ReadWriteOptional,
}

impl ComponentAccess {
    /// Returns `true` for the optional variants.
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::ReadOnlyOptional | Self::ReadWriteOptional)
    }

    /// Returns `true` if the access mode may write the component.
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadWriteOptional)
    }
}

/// One entry of a query signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentAccessInfo {
    /// Component being accessed.
    pub component_id: ComponentID,
    /// Access mode for the component.
    pub access: ComponentAccess,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_id_round_trips_its_parts() {
        let id = component_id(0xDEAD_BEEF, 0x1234_5678);
        assert_eq!(type_id_of_component(id), 0xDEAD_BEEF);
        assert_eq!(name_hash_of_component(id), 0x1234_5678);
    }

    #[test]
    fn chunk_size_presets_are_powers_of_two() {
        for size in [ArchetypeChunkSize::Dozens, ArchetypeChunkSize::Medium, ArchetypeChunkSize::Thousands] {
            assert!(size.rows().is_power_of_two());
            assert_eq!(size.mask() + 1, size.rows());
        }
        assert_eq!(ArchetypeChunkSize::default(), ArchetypeChunkSize::Thousands);
    }
}
