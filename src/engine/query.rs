//! Query descriptions, archetype matching and chunk views.
//!
//! A query is a compiled component-access signature plus require/exclude
//! filters. Systems and event handlers are queries with a callback attached.
//!
//! ## Matching model
//!
//! Matching happens at registration time, never per tick:
//!
//! 1. When a query is registered it is matched against every existing archetype.
//! 2. When an archetype is created it is matched against every existing query.
//!
//! A successful match appends a [`QueryCacheEntry`] holding, in signature
//! order, where each slot's data lives ([`ColumnRef`]) and, for write slots,
//! which tracked columns must be marked dirty after iteration. The cache is
//! append-only; archetypes are never removed.
//!
//! ## Execution model
//!
//! Iteration walks a cached archetype chunk by chunk and hands each chunk to
//! the callback as a [`ChunkView`]. The view produces strongly-typed cursors
//! per slot:
//!
//! ```ignore
//! let mut movement = |view: &ChunkView<'_>| {
//!     let mut position = view.write::<Position>(0);
//!     let velocity = view.read::<Velocity>(1);
//!     for row in 0..view.len() {
//!         if let (Some(p), Some(v)) = (position.get_mut(row), velocity.get(row)) {
//!             p.x += v.x * DT;
//!         }
//!     }
//! };
//! ```
//!
//! A single-entity lookup uses the same view type with a length of one.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::slice;

use log::error;

use crate::engine::archetype::Archetype;
use crate::engine::borrow::{BorrowConflict, SlotBorrows};
use crate::engine::component::component_id_of;
use crate::engine::entity::{EntityId, ENTITY_ID_COMPONENT};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::hash::fnv_hash_str;
use crate::engine::singleton::SingletonStorage;
use crate::engine::type_registry::TypeRegistry;
use crate::engine::types::{
    type_id_of_component, ArchetypeID, ComponentAccess, ComponentAccessInfo, ComponentID, NameHash, RowID, TypeID,
};

/// Names a component in a description before it is resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentSelector {
    /// An already-resolved component id.
    Id(ComponentID),
    /// A component named `name` whose type is the registered Rust type `rust_type`.
    Typed {
        /// Rust type of the component.
        rust_type: TypeId,
        /// Rust type name, for diagnostics.
        rust_name: &'static str,
        /// Component name.
        name: String,
    },
}

impl ComponentSelector {
    /// Selects component `name` of type `T`.
    pub fn of<T: 'static>(name: &str) -> Self {
        ComponentSelector::Typed { rust_type: TypeId::of::<T>(), rust_name: type_name::<T>(), name: name.to_owned() }
    }

    /// Resolves the selector to a component id.
    ///
    /// ## Errors
    /// [`EcsError::UnregisteredType`] if the Rust type was never registered.

    pub fn resolve(&self, types: &TypeRegistry) -> EcsResult<ComponentID> {
        match self {
            ComponentSelector::Id(component_id) => Ok(*component_id),
            ComponentSelector::Typed { rust_type, rust_name, name } => types
                .type_id_of_rust(*rust_type)
                .map(|type_id| component_id_of(type_id, name))
                .ok_or(EcsError::UnregisteredType(rust_name)),
        }
    }
}

impl From<ComponentID> for ComponentSelector {
    fn from(component_id: ComponentID) -> Self {
        ComponentSelector::Id(component_id)
    }
}

/// Declarative description of a query, system or event handler.
///
/// ## Example
/// ```ignore
/// let movement = QueryDescription::new("movement")
///     .write::<Float3>("position")
///     .read::<Float3>("velocity")
///     .read_optional::<f32>("drag")
///     .exclude::<bool>("frozen")
///     .after("spawn");
/// ```

#[derive(Clone, Debug, Default)]
pub struct QueryDescription {
    name: String,
    signature: Vec<(ComponentSelector, ComponentAccess)>,
    require: Vec<ComponentSelector>,
    exclude: Vec<ComponentSelector>,
    before: Vec<String>,
    after: Vec<String>,
}

impl QueryDescription {
    /// Starts an empty description named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Appends a signature slot with an explicit access mode.
    pub fn access(mut self, component: impl Into<ComponentSelector>, access: ComponentAccess) -> Self {
        self.signature.push((component.into(), access));
        self
    }

    /// Appends a read-write slot.
    pub fn write<T: 'static>(self, name: &str) -> Self {
        self.access(ComponentSelector::of::<T>(name), ComponentAccess::ReadWrite)
    }

    /// Appends a read-only slot.
    pub fn read<T: 'static>(self, name: &str) -> Self {
        self.access(ComponentSelector::of::<T>(name), ComponentAccess::ReadOnly)
    }

    /// Appends a read-by-value slot.
    pub fn read_copy<T: 'static>(self, name: &str) -> Self {
        self.access(ComponentSelector::of::<T>(name), ComponentAccess::ReadCopy)
    }

    /// Appends an optional read-only slot.
    pub fn read_optional<T: 'static>(self, name: &str) -> Self {
        self.access(ComponentSelector::of::<T>(name), ComponentAccess::ReadOnlyOptional)
    }

    /// Appends an optional read-write slot.
    pub fn write_optional<T: 'static>(self, name: &str) -> Self {
        self.access(ComponentSelector::of::<T>(name), ComponentAccess::ReadWriteOptional)
    }

    /// Only matches archetypes that store component `name` of type `T`.
    pub fn require<T: 'static>(mut self, name: &str) -> Self {
        self.require.push(ComponentSelector::of::<T>(name));
        self
    }

    /// Never matches archetypes that store component `name` of type `T`.
    pub fn exclude<T: 'static>(mut self, name: &str) -> Self {
        self.exclude.push(ComponentSelector::of::<T>(name));
        self
    }

    /// Orders this query before every query named `name`.
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.before.push(name.into());
        self
    }

    /// Orders this query after every query named `name`.
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Where one signature slot's data lives for one archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnRef {
    /// Column index within the archetype.
    Column(usize),
    /// The process-wide instance of a singleton type.
    Singleton(TypeID),
    /// An optional slot the archetype does not provide.
    Missing,
}

/// Resolved slots of one matched archetype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryCacheEntry {
    /// Matched archetype.
    pub archetype_id: ArchetypeID,
    /// Position of the archetype in the manager's archetype list.
    pub archetype_index: usize,
    /// Resolution of every signature slot, in signature order.
    pub columns: Vec<ColumnRef>,
    /// Tracked-column indices written by the query.
    pub tracked: Vec<usize>,
}

/// A compiled query with its archetype cache.
#[derive(Debug)]
pub struct Query {
    name: String,
    name_hash: NameHash,
    signature: Vec<ComponentAccessInfo>,
    require: Vec<ComponentID>,
    exclude: Vec<ComponentID>,
    before: Vec<String>,
    after: Vec<String>,
    cache: Vec<QueryCacheEntry>,
    cache_index: HashMap<ArchetypeID, usize>,
}

impl Query {
    /// Resolves every selector of `description`.
    ///
    /// ## Errors
    /// - [`EcsError::UnregisteredType`] for a selector of an unregistered type.
    /// - [`EcsError::InvalidSignature`] if a component appears twice in the
    ///   signature or the `eid` component is declared writable.

    pub fn compile(description: QueryDescription, types: &TypeRegistry) -> EcsResult<Self> {
        let QueryDescription { name, signature, require, exclude, before, after } = description;

        let mut resolved = Vec::with_capacity(signature.len());
        for (selector, access) in &signature {
            let component_id = selector.resolve(types)?;
            if resolved.iter().any(|info: &ComponentAccessInfo| info.component_id == component_id) {
                return Err(EcsError::InvalidSignature {
                    query: name,
                    reason: format!("component {component_id:#x} is listed twice"),
                });
            }
            if component_id == ENTITY_ID_COMPONENT && access.is_write() {
                return Err(EcsError::InvalidSignature {
                    query: name,
                    reason: "the eid component is read-only".to_owned(),
                });
            }
            resolved.push(ComponentAccessInfo { component_id, access: *access });
        }

        let require = require.iter().map(|s| s.resolve(types)).collect::<EcsResult<Vec<_>>>()?;
        let exclude = exclude.iter().map(|s| s.resolve(types)).collect::<EcsResult<Vec<_>>>()?;

        Ok(Self {
            name_hash: fnv_hash_str(&name),
            name,
            signature: resolved,
            require,
            exclude,
            before,
            after,
            cache: Vec::new(),
            cache_index: HashMap::new(),
        })
    }

    /// Display name.
    #[inline] pub fn name(&self) -> &str { &self.name }
    /// Hash of the display name.
    #[inline] pub fn name_hash(&self) -> NameHash { self.name_hash }
    /// Resolved signature.
    #[inline] pub fn signature(&self) -> &[ComponentAccessInfo] { &self.signature }
    /// Required components.
    #[inline] pub fn require(&self) -> &[ComponentID] { &self.require }
    /// Excluded components.
    #[inline] pub fn exclude(&self) -> &[ComponentID] { &self.exclude }
    /// Names this query runs before.
    #[inline] pub fn before(&self) -> &[String] { &self.before }
    /// Names this query runs after.
    #[inline] pub fn after(&self) -> &[String] { &self.after }
    /// Every matched archetype, in match order.
    #[inline] pub fn cache(&self) -> &[QueryCacheEntry] { &self.cache }

    /// Cache entry for an archetype, if the query matched it.
    #[inline]
    pub fn entry_for(&self, archetype_id: ArchetypeID) -> Option<&QueryCacheEntry> {
        self.cache_index.get(&archetype_id).map(|&i| &self.cache[i])
    }

    /// Returns `true` if the query matched `archetype_id`.
    #[inline]
    pub fn matches(&self, archetype_id: ArchetypeID) -> bool {
        self.cache_index.contains_key(&archetype_id)
    }

    /// Matches the query against one archetype and caches the resolution.
    ///
    /// ## Behavior
    /// - Fails without caching if a required component is absent or an
    ///   excluded component is present.
    /// - Each slot resolves to the archetype's column; otherwise to the
    ///   singleton instance of its type; otherwise, for optional slots, to
    ///   [`ColumnRef::Missing`]. A mandatory slot that resolves to nothing
    ///   fails the match.
    /// - Write slots backed by a tracked column record that column so that
    ///   iteration can mark it dirty.
    /// - Matching an archetype twice is a no-op that reports the match.
    ///
    /// Returns `true` if the archetype matched.

    pub fn try_registrate(
        &mut self,
        archetype_index: usize,
        archetype: &Archetype,
        types: &TypeRegistry,
        singletons: &SingletonStorage,
    ) -> bool {
        let archetype_id = archetype.archetype_id();
        if self.matches(archetype_id) {
            return true;
        }
        if !self.require.iter().all(|&c| archetype.has_component(c))
            || self.exclude.iter().any(|&c| archetype.has_component(c))
        {
            return false;
        }

        let mut columns = Vec::with_capacity(self.signature.len());
        let mut tracked = Vec::new();
        for info in &self.signature {
            if let Some(index) = archetype.column_index(info.component_id) {
                columns.push(ColumnRef::Column(index));
                if info.access.is_write() {
                    tracked.extend(archetype.tracked_index(info.component_id));
                }
                continue;
            }
            let type_id = type_id_of_component(info.component_id);
            let is_singleton = types.get(type_id).is_some_and(|d| d.is_singleton());
            if is_singleton && singletons.get(type_id).is_some() {
                if columns.contains(&ColumnRef::Singleton(type_id)) {
                    error!(
                        "Query `{}` lists two components of singleton type {}, which share one instance",
                        self.name,
                        types.name_of(type_id)
                    );
                    return false;
                }
                columns.push(ColumnRef::Singleton(type_id));
            } else if info.access.is_optional() {
                columns.push(ColumnRef::Missing);
            } else {
                return false;
            }
        }

        self.cache_index.insert(archetype_id, self.cache.len());
        self.cache.push(QueryCacheEntry { archetype_id, archetype_index, columns, tracked });
        true
    }
}

/// Typed read cursor over one slot of a [`ChunkView`].
#[derive(Debug)]
pub enum ColumnCursor<'v, T> {
    /// One value per row of the view.
    Slice(&'v [T]),
    /// The singleton instance, shared by every row.
    Singleton(&'v T),
    /// Optional slot not provided by this archetype.
    Missing,
}

impl<'v, T> ColumnCursor<'v, T> {
    /// Value for `row` of the view, or `None` for a missing slot.
    #[inline]
    pub fn get(&self, row: usize) -> Option<&'v T> {
        match *self {
            ColumnCursor::Slice(values) => values.get(row),
            ColumnCursor::Singleton(value) => Some(value),
            ColumnCursor::Missing => None,
        }
    }

    /// Returns `true` if the archetype does not provide the slot.
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, ColumnCursor::Missing)
    }

    /// Per-row values, if the slot is an archetype column.
    #[inline]
    pub fn as_slice(&self) -> Option<&'v [T]> {
        match *self {
            ColumnCursor::Slice(values) => Some(values),
            _ => None,
        }
    }
}

/// Typed write cursor over one slot of a [`ChunkView`].
#[derive(Debug)]
pub enum ColumnCursorMut<'v, T> {
    /// One value per row of the view.
    Slice(&'v mut [T]),
    /// The singleton instance, shared by every row.
    Singleton(&'v mut T),
    /// Optional slot not provided by this archetype.
    Missing,
}

impl<T> ColumnCursorMut<'_, T> {
    /// Value for `row` of the view.
    #[inline]
    pub fn get(&self, row: usize) -> Option<&T> {
        match self {
            ColumnCursorMut::Slice(values) => values.get(row),
            ColumnCursorMut::Singleton(value) => Some(&**value),
            ColumnCursorMut::Missing => None,
        }
    }

    /// Mutable value for `row` of the view.
    #[inline]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        match self {
            ColumnCursorMut::Slice(values) => values.get_mut(row),
            ColumnCursorMut::Singleton(value) => Some(&mut **value),
            ColumnCursorMut::Missing => None,
        }
    }

    /// Returns `true` if the archetype does not provide the slot.
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, ColumnCursorMut::Missing)
    }

    /// Per-row values, if the slot is an archetype column.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match self {
            ColumnCursorMut::Slice(values) => Some(&mut **values),
            _ => None,
        }
    }
}

/// A run of rows within one chunk of a matched archetype.
///
/// ## Invariants
/// - `first_row..first_row + len` lies within one chunk and below the
///   archetype's row count, and `len > 0`.
/// - Cursors borrow the view; the per-slot tracker rejects aliasing cursors.

pub struct ChunkView<'v> {
    archetype: &'v Archetype,
    singletons: &'v SingletonStorage,
    signature: &'v [ComponentAccessInfo],
    entry: &'v QueryCacheEntry,
    first_row: RowID,
    len: usize,
    borrows: SlotBorrows,
}

impl<'v> ChunkView<'v> {
    pub(crate) fn new(
        archetype: &'v Archetype,
        singletons: &'v SingletonStorage,
        signature: &'v [ComponentAccessInfo],
        entry: &'v QueryCacheEntry,
        first_row: RowID,
        len: usize,
    ) -> Self {
        debug_assert!(len > 0 && first_row as usize + len <= archetype.entity_count() as usize);
        Self { archetype, singletons, signature, entry, first_row, len, borrows: SlotBorrows::new(signature.len()) }
    }

    /// Number of rows in the view.
    #[inline] pub fn len(&self) -> usize { self.len }
    /// Views are never empty; provided for API symmetry.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }
    /// Archetype row of the view's first row.
    #[inline] pub fn first_row(&self) -> RowID { self.first_row }
    /// Archetype the view belongs to.
    #[inline] pub fn archetype_id(&self) -> ArchetypeID { self.archetype.archetype_id() }
    /// Number of signature slots.
    #[inline] pub fn slot_count(&self) -> usize { self.signature.len() }

    /// Returns `true` if `slot` resolved to data for this archetype.
    #[inline]
    pub fn has(&self, slot: usize) -> bool {
        self.entry.columns.get(slot).is_some_and(|c| *c != ColumnRef::Missing)
    }

    /// Handles of the view's rows, or an empty slice if the archetype has no `eid` column.
    pub fn entities(&self) -> &[EntityId] {
        match self.archetype.column_index(ENTITY_ID_COMPONENT) {
            Some(index) => {
                let column = self.archetype.column(index);
                if !column.is::<EntityId>() {
                    return &[];
                }
                // SAFETY: type checked; rows of the view are live; eid is never writable through a view.
                unsafe { slice::from_raw_parts(column.get_data(self.first_row).cast::<EntityId>(), self.len) }
            }
            None => &[],
        }
    }

    /// Handle of row `row` of the view.
    #[inline]
    pub fn entity(&self, row: usize) -> EntityId {
        self.entities().get(row).copied().unwrap_or(EntityId::INVALID)
    }

    fn type_mismatch<T>(&self, slot: usize, stored: &str) -> ! {
        panic!(
            "slot {slot} of archetype {:#x} stores `{stored}`, not `{}`",
            self.archetype.archetype_id(),
            type_name::<T>()
        )
    }

    fn borrow_failed(&self, slot: usize, conflict: BorrowConflict) -> ! {
        panic!("slot {slot} of archetype {:#x} is already borrowed: {conflict:?}", self.archetype.archetype_id())
    }

    /// Read cursor for `slot`.
    ///
    /// # Panics
    /// If `slot` is out of range, stores a type other than `T`, or is
    /// already mutably borrowed through this view.

    pub fn read<T: 'static>(&self, slot: usize) -> ColumnCursor<'_, T> {
        if let Err(conflict) = self.borrows.acquire_read(slot) {
            self.borrow_failed(slot, conflict);
        }
        match self.entry.columns[slot] {
            ColumnRef::Column(index) => {
                let column = self.archetype.column(index);
                if !column.is::<T>() {
                    self.type_mismatch::<T>(slot, column.type_name());
                }
                // SAFETY: type checked; the rows lie within one chunk and are live; no writer exists for the slot.
                ColumnCursor::Slice(unsafe {
                    slice::from_raw_parts(column.get_data(self.first_row).cast::<T>(), self.len)
                })
            }
            ColumnRef::Singleton(type_id) => match self.singletons.get(type_id) {
                // SAFETY: type checked; no writer exists for the slot.
                Some(instance) if instance.is::<T>() => ColumnCursor::Singleton(unsafe { &*instance.data().cast::<T>() }),
                _ => self.type_mismatch::<T>(slot, "another singleton type"),
            },
            ColumnRef::Missing => ColumnCursor::Missing,
        }
    }

    /// Write cursor for `slot`.
    ///
    /// # Panics
    /// If `slot` is out of range, was declared without write access, stores a
    /// type other than `T`, or is already borrowed through this view.

    pub fn write<T: 'static>(&self, slot: usize) -> ColumnCursorMut<'_, T> {
        if !self.signature[slot].access.is_write() {
            panic!("slot {slot} is declared {:?}, not writable", self.signature[slot].access);
        }
        if let Err(conflict) = self.borrows.acquire_write(slot) {
            self.borrow_failed(slot, conflict);
        }
        match self.entry.columns[slot] {
            ColumnRef::Column(index) => {
                let column = self.archetype.column(index);
                if !column.is::<T>() {
                    self.type_mismatch::<T>(slot, column.type_name());
                }
                // SAFETY: type checked; the slot is exclusively borrowed and no other slot maps to this column.
                ColumnCursorMut::Slice(unsafe {
                    slice::from_raw_parts_mut(column.get_data(self.first_row).cast::<T>(), self.len)
                })
            }
            ColumnRef::Singleton(type_id) => match self.singletons.get(type_id) {
                // SAFETY: type checked; the instance has its own allocation and no other slot maps to it.
                Some(instance) if instance.is::<T>() => {
                    ColumnCursorMut::Singleton(unsafe { &mut *instance.data().cast::<T>() })
                }
                _ => self.type_mismatch::<T>(slot, "another singleton type"),
            },
            ColumnRef::Missing => ColumnCursorMut::Missing,
        }
    }
}

/// Invokes `f` once per used chunk of `archetype`.
pub(crate) fn for_each_chunk(
    archetype: &Archetype,
    singletons: &SingletonStorage,
    signature: &[ComponentAccessInfo],
    entry: &QueryCacheEntry,
    mut f: impl FnMut(&ChunkView<'_>),
) {
    let power = archetype.chunk_size().power();
    for chunk in 0..archetype.used_chunk_count() {
        let rows = archetype.rows_in_chunk(chunk) as usize;
        if rows == 0 {
            continue;
        }
        let view = ChunkView::new(archetype, singletons, signature, entry, (chunk as RowID) << power, rows);
        f(&view);
    }
}

/// Invokes `f` once with a single-row view of `row`.
pub(crate) fn for_row(
    archetype: &Archetype,
    singletons: &SingletonStorage,
    signature: &[ComponentAccessInfo],
    entry: &QueryCacheEntry,
    row: RowID,
    f: impl FnOnce(&ChunkView<'_>),
) {
    if row >= archetype.entity_count() {
        return;
    }
    let view = ChunkView::new(archetype, singletons, signature, entry, row, 1);
    f(&view);
}
