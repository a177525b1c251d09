//! Archetype storage: one table per distinct component set.
//!
//! An [`Archetype`] owns one [`Column`] per component, plus one
//! [`TrackedColumn`] per component that is under change observation. All
//! columns grow in lockstep, one chunk at a time, so every column always has
//! exactly the same row capacity.
//!
//! ## Identity
//!
//! An archetype is identified by an order-independent fold of its
//! `(ComponentID, tracked)` set ([`archetype_id_of`]). Archetypes are created
//! lazily by the manager and never destroyed; only their row capacity grows.
//!
//! ## Row lifecycle
//!
//! - [`Archetype::add_entity`] / [`Archetype::add_entities`] append rows,
//!   preferring a matching override (moved in), then a matching template
//!   default (copied in), then a registry default (logged as an error).
//! - [`Archetype::remove_entity`] destructs a row and swap-and-pops the last
//!   row into the hole, so rows never become sparse.
//! - [`Archetype::destroy_all_entities`] destructs every row without
//!   compaction; it runs at teardown.
//!
//! ## Invariants
//! - `columns[i].capacity() == capacity` for every column and shadow column.
//! - Rows `0..entity_count` are initialised in every column and shadow column;
//!   rows beyond it are uninitialised.

use std::collections::HashMap;

use log::error;

use crate::engine::component::ComponentRegistry;
use crate::engine::hash::{fnv_hash_u32, FNV_OFFSET};
use crate::engine::storage::{Column, TrackedColumn};
use crate::engine::type_registry::TypeRegistry;
use crate::engine::types::{
    type_id_of_component, ArchetypeChunkSize, ArchetypeID, ComponentID, RowID, TrackMask,
    MAX_TRACKED_COMPONENTS,
};
use crate::engine::value::{ComponentMap, ComponentVecMap};

/// Sorted `(ComponentID, tracked)` set defining an archetype.
pub type ArchetypeComponentType = Vec<(ComponentID, bool)>;

/// Computes the archetype id of a component set.
///
/// ## Behavior
/// The set is sorted and deduplicated by component before folding, so the
/// result does not depend on insertion order.

pub fn archetype_id_of(components: &[(ComponentID, bool)]) -> ArchetypeID {
    let normalized = normalize_components(components.to_vec());
    fold_archetype_id(&normalized)
}

/// Sorts a component set by id and drops duplicate components (first wins).
pub fn normalize_components(mut components: ArchetypeComponentType) -> ArchetypeComponentType {
    components.sort_by_key(|(component_id, _)| *component_id);
    components.dedup_by_key(|(component_id, _)| *component_id);
    components
}

fn fold_archetype_id(sorted: &[(ComponentID, bool)]) -> ArchetypeID {
    sorted.iter().fold(FNV_OFFSET, |id, &(component_id, tracked)| {
        let id = fnv_hash_u32(component_id as u32, id);
        let id = fnv_hash_u32((component_id >> 32) as u32, id);
        fnv_hash_u32(tracked as u32, id)
    })
}

/// A change-event subscription registered against an archetype.
///
/// `mask` selects the tracked columns (by tracked-column index) whose changes
/// fire the handler registered at index `handler`.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedEvent {
    /// Registration index of the subscribed event handler.
    pub handler: usize,
    /// Tracked columns the handler observes.
    pub mask: TrackMask,
}

/// Columnar table of every entity sharing one component set.
pub struct Archetype {
    archetype_id: ArchetypeID,
    components: ArchetypeComponentType,
    columns: Vec<Column>,
    column_index: HashMap<ComponentID, usize>,
    tracked_columns: Vec<TrackedColumn>,
    tracked_index: HashMap<ComponentID, usize>,
    tracked_events: Vec<TrackedEvent>,
    entity_count: u32,
    capacity: u32,
    chunk_size: ArchetypeChunkSize,
}

impl Archetype {
    /// Creates an empty archetype for `components`.
    ///
    /// ## Behavior
    /// - A component whose type is missing from the registry is logged and
    ///   left out of the archetype.
    /// - A component flagged as tracked whose type has no compare-and-assign
    ///   operation is logged and stored untracked, as is any tracked component
    ///   beyond the supported number of tracked columns.
    /// - No chunk is allocated until the first row is added.

    pub fn new(
        types: &TypeRegistry,
        component_names: &ComponentRegistry,
        archetype_id: ArchetypeID,
        components: ArchetypeComponentType,
        chunk_size: ArchetypeChunkSize,
    ) -> Self {
        let components = normalize_components(components);
        let mut archetype = Self {
            archetype_id,
            components: Vec::with_capacity(components.len()),
            columns: Vec::with_capacity(components.len()),
            column_index: HashMap::with_capacity(components.len()),
            tracked_columns: Vec::new(),
            tracked_index: HashMap::new(),
            tracked_events: Vec::new(),
            entity_count: 0,
            capacity: 0,
            chunk_size,
        };

        for (component_id, tracked) in components {
            let type_id = type_id_of_component(component_id);
            let name = component_names.name_of(component_id);
            let Some(declaration) = types.get(type_id) else {
                error!("Type with hash {type_id:#x} not found, component `{name}` is left out of archetype {archetype_id:#x}");
                continue;
            };
            let column = match Column::new(chunk_size, declaration, component_id, name) {
                Ok(column) => column,
                Err(err) => {
                    error!("{err}, component is left out of archetype {archetype_id:#x}");
                    continue;
                }
            };
            let column_index = archetype.columns.len();
            archetype.columns.push(column);
            archetype.column_index.insert(component_id, column_index);
            archetype.components.push((component_id, tracked));

            if !tracked {
                continue;
            }
            if !declaration.is_trackable() {
                error!(
                    "Type {} has no compare_and_assign function, component `{name}` can't be tracked",
                    declaration.type_name()
                );
                continue;
            }
            if archetype.tracked_columns.len() >= MAX_TRACKED_COMPONENTS {
                error!("Archetype {archetype_id:#x} tracks more than {MAX_TRACKED_COMPONENTS} components, `{name}` is stored untracked");
                continue;
            }
            match Column::new(chunk_size, declaration, component_id, name) {
                Ok(shadow) => {
                    archetype.tracked_index.insert(component_id, archetype.tracked_columns.len());
                    archetype.tracked_columns.push(TrackedColumn::new(shadow, column_index));
                }
                Err(err) => error!("{err}, component `{name}` is stored untracked"),
            }
        }

        archetype
    }

    /// Identifier of the archetype.
    #[inline] pub fn archetype_id(&self) -> ArchetypeID { self.archetype_id }
    /// Sorted `(ComponentID, tracked)` set actually stored.
    #[inline] pub fn components(&self) -> &[(ComponentID, bool)] { &self.components }
    /// Number of live rows.
    #[inline] pub fn entity_count(&self) -> u32 { self.entity_count }
    /// Returns `true` if the archetype holds no rows.
    #[inline] pub fn is_empty(&self) -> bool { self.entity_count == 0 }
    /// Allocated row capacity.
    #[inline] pub fn capacity(&self) -> u32 { self.capacity }
    /// Chunk size preset.
    #[inline] pub fn chunk_size(&self) -> ArchetypeChunkSize { self.chunk_size }
    /// Every live column, in component-id order.
    #[inline] pub fn columns(&self) -> &[Column] { &self.columns }
    /// Every shadow column.
    #[inline] pub fn tracked_columns(&self) -> &[TrackedColumn] { &self.tracked_columns }
    /// Change-event subscriptions.
    #[inline] pub fn tracked_events(&self) -> &[TrackedEvent] { &self.tracked_events }

    /// Number of allocated chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        (self.capacity >> self.chunk_size.power()) as usize
    }

    /// Number of chunks holding at least one live row.
    #[inline]
    pub fn used_chunk_count(&self) -> usize {
        self.entity_count.div_ceil(self.chunk_size.rows()) as usize
    }

    /// Number of live rows in chunk `chunk`.
    #[inline]
    pub fn rows_in_chunk(&self, chunk: usize) -> u32 {
        let start = (chunk as u32) << self.chunk_size.power();
        self.entity_count.saturating_sub(start).min(self.chunk_size.rows())
    }

    /// Column index of a component.
    #[inline]
    pub fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.column_index.get(&component_id).copied()
    }

    /// Tracked-column index of a component.
    #[inline]
    pub fn tracked_index(&self, component_id: ComponentID) -> Option<usize> {
        self.tracked_index.get(&component_id).copied()
    }

    /// Returns `true` if the archetype stores the component.
    #[inline]
    pub fn has_component(&self, component_id: ComponentID) -> bool {
        self.column_index.contains_key(&component_id)
    }

    /// Returns column `index`.
    #[inline]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Borrows a component value at `row`.
    pub fn get_component<T: 'static>(&self, component_id: ComponentID, row: RowID) -> Option<&T> {
        let column = &self.columns[self.column_index(component_id)?];
        if !column.is::<T>() || row >= self.entity_count {
            return None;
        }
        // SAFETY: type checked; `row` is a live row.
        Some(unsafe { &*column.get_data(row).cast::<T>() })
    }

    /// Mutably borrows a component value at `row`, marking the row dirty if tracked.
    pub fn get_component_mut<T: 'static>(&mut self, component_id: ComponentID, row: RowID) -> Option<&mut T> {
        let index = self.column_index(component_id)?;
        if !self.columns[index].is::<T>() || row >= self.entity_count {
            return None;
        }
        if let Some(tracked) = self.tracked_index(component_id) {
            self.tracked_columns[tracked].mark_dirty(row);
        }
        // SAFETY: type checked; `row` is live; exclusive borrow of `self`.
        Some(unsafe { &mut *self.columns[index].get_data(row).cast::<T>() })
    }

    /// Grows every column until `required` more rows fit.
    pub fn try_add_chunk(&mut self, required: u32) {
        while self.entity_count + required > self.capacity {
            self.capacity += self.chunk_size.rows();
            for column in &mut self.columns {
                column.add_chunk();
            }
            for tracked in &mut self.tracked_columns {
                tracked.add_chunk();
            }
        }
    }

    fn seed_tracked_rows(&mut self, first: RowID, count: u32) {
        for tracked in &self.tracked_columns {
            let column = &self.columns[tracked.source_column()];
            let copy = column.ops().copy_construct;
            for row in first..first + count {
                // SAFETY: `row` was just initialised in the source column; the shadow slot is uninitialised.
                unsafe { copy(tracked.shadow().get_data(row), column.get_data(row)) };
            }
        }
    }

    /// Appends one row and returns it.
    ///
    /// ## Behavior
    /// For every column, in order of preference:
    /// 1. a value in `overrides` of the column's type is moved in (and removed
    ///    from the map),
    /// 2. a value in `template_init` of the column's type is copied in,
    /// 3. the registry default is constructed and an error is logged.
    ///
    /// An override of the wrong type is logged and dropped. Shadow columns are
    /// seeded with a copy of the new row. Overrides that match no column stay
    /// in `overrides` for the caller to report.

    pub fn add_entity(&mut self, template_init: &ComponentMap, overrides: &mut ComponentMap) -> RowID {
        self.try_add_chunk(1);
        let row = self.entity_count;

        for column in &self.columns {
            let dst = column.get_data(row);
            if let Some(value) = overrides.remove(&column.component_id()) {
                if value.rust_type() == column.rust_type() {
                    // SAFETY: type checked; `dst` is an uninitialised slot of the column.
                    unsafe { value.move_into(dst) };
                    continue;
                }
                error!(
                    "Component {} has type {} but expected {}, during create_entity",
                    column.debug_name(),
                    value.type_name(),
                    column.type_name()
                );
            }
            if let Some(value) = template_init.get(&column.component_id()) {
                if value.rust_type() == column.rust_type() {
                    // SAFETY: type checked; `dst` is uninitialised.
                    unsafe { value.clone_into(dst) };
                    continue;
                }
                error!(
                    "Template default for component {} has type {} but expected {}",
                    column.debug_name(),
                    value.type_name(),
                    column.type_name()
                );
            }
            // SAFETY: `dst` is uninitialised.
            unsafe { (column.ops().construct_default)(dst) };
            error!("No initialization data for component {}", column.debug_name());
        }

        self.seed_tracked_rows(row, 1);
        self.entity_count += 1;
        row
    }

    /// Appends `count` rows and returns the first one.
    ///
    /// ## Behavior
    /// Same preference order as [`Archetype::add_entity`], applied per column:
    /// a matching vector in `overrides` moves its first `count` elements in;
    /// otherwise the template default is copied into every new row; otherwise
    /// every new row is default-constructed and one error is logged.
    ///
    /// Every vector in `overrides` must hold at least `count` elements.

    pub fn add_entities(&mut self, template_init: &ComponentMap, mut overrides: ComponentVecMap, count: u32) -> RowID {
        let first = self.entity_count;
        if count == 0 {
            return first;
        }
        self.try_add_chunk(count);

        for column in &self.columns {
            if let Some(values) = overrides.remove(&column.component_id()) {
                if values.rust_type() == column.rust_type() && values.len() >= count as usize {
                    // SAFETY: type checked; the destination rows are uninitialised and distinct.
                    unsafe { values.move_prefix_into(count as usize, |i| column.get_data(first + i as u32)) };
                    continue;
                }
                error!(
                    "Component {} has type {} but expected {}, during create_entities",
                    column.debug_name(),
                    values.type_name(),
                    column.type_name()
                );
            }
            if let Some(value) = template_init.get(&column.component_id()) {
                if value.rust_type() == column.rust_type() {
                    for row in first..first + count {
                        // SAFETY: type checked; `row` is uninitialised.
                        unsafe { value.clone_into(column.get_data(row)) };
                    }
                    continue;
                }
                error!(
                    "Template default for component {} has type {} but expected {}",
                    column.debug_name(),
                    value.type_name(),
                    column.type_name()
                );
            }
            for row in first..first + count {
                // SAFETY: `row` is uninitialised.
                unsafe { (column.ops().construct_default)(column.get_data(row)) };
            }
            error!("No initialization data for component {}", column.debug_name());
        }

        self.seed_tracked_rows(first, count);
        self.entity_count += count;
        first
    }

    /// Destructs `row` and moves the last row into its slot.
    ///
    /// ## Behavior
    /// - Every column and shadow column destructs the row's value.
    /// - Unless `row` was the last row, the last row's values (and dirty bits)
    ///   are relocated into `row`.
    /// - The row count shrinks by one.
    ///
    /// Returns the row that was moved into `row`, if any.

    pub fn remove_entity(&mut self, row: RowID) -> Option<RowID> {
        if row >= self.entity_count {
            error!("Row {row} is out of range for archetype {:#x}", self.archetype_id);
            return None;
        }
        let last = self.entity_count - 1;

        for column in &self.columns {
            Self::remove_from_column(column, row, last);
        }
        for tracked in &mut self.tracked_columns {
            Self::remove_from_column(tracked.shadow(), row, last);
            tracked.move_dirty_bit(row, last);
        }

        self.entity_count = last;
        (row != last).then_some(last)
    }

    fn remove_from_column(column: &Column, row: RowID, last: RowID) {
        let removed = column.get_data(row);
        // SAFETY: `row` is live; after destruction the slot is refilled from `last`, which is then dead.
        unsafe {
            (column.ops().destruct)(removed);
            if row != last {
                (column.ops().move_construct)(removed, column.get_data(last));
            }
        }
    }

    /// Destructs every live row in every column without compaction.
    pub fn destroy_all_entities(&mut self) {
        let count = self.entity_count;
        for column in &self.columns {
            for row in 0..count {
                // SAFETY: rows below `count` are initialised; each is destructed once.
                unsafe { (column.ops().destruct)(column.get_data(row)) };
            }
        }
        for tracked in &mut self.tracked_columns {
            let shadow = tracked.shadow();
            for row in 0..count {
                // SAFETY: as above.
                unsafe { (shadow.ops().destruct)(shadow.get_data(row)) };
            }
            tracked.reset_dirty();
        }
        self.entity_count = 0;
    }

    /// Marks tracked columns dirty after a write-access iteration.
    ///
    /// `row == None` marks the whole archetype; `Some(row)` a single row.

    pub fn mark_tracked_dirty(&mut self, tracked: &[usize], row: Option<RowID>) {
        for &index in tracked {
            let Some(column) = self.tracked_columns.get_mut(index) else {
                continue;
            };
            match row {
                Some(row) => column.mark_dirty(row),
                None => column.mark_all_dirty(),
            }
        }
    }

    /// Registers a change-event subscription.
    pub fn add_tracked_event(&mut self, event: TrackedEvent) {
        self.tracked_events.push(event);
    }

    /// Splits the archetype for a tracking pass.
    pub(crate) fn tracking_parts(&mut self) -> (&[Column], &mut [TrackedColumn], u32) {
        (&self.columns, &mut self.tracked_columns, self.entity_count)
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        self.destroy_all_entities();
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("archetype_id", &self.archetype_id)
            .field("columns", &self.columns)
            .field("tracked_columns", &self.tracked_columns)
            .field("entity_count", &self.entity_count)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::component_id_of;
    use crate::engine::type_registry::TypeDeclaration;
    use crate::engine::value::ComponentValue;

    fn registries() -> (TypeRegistry, ComponentRegistry, ComponentID, ComponentID) {
        let mut types = TypeRegistry::new();
        let mut components = ComponentRegistry::new();
        let int = types.register(TypeDeclaration::tracked::<i32>("int")).unwrap();
        let string = types.register(TypeDeclaration::of::<String>("string")).unwrap();
        let health = components.get_or_add(int, "health").unwrap();
        let name = components.get_or_add(string, "name").unwrap();
        (types, components, health, name)
    }

    #[test]
    fn archetype_id_is_order_independent() {
        let a = archetype_id_of(&[(1, false), (2, true), (3, false)]);
        let b = archetype_id_of(&[(3, false), (1, false), (2, true)]);
        let c = archetype_id_of(&[(1, false), (2, false), (3, false)]);
        let d = archetype_id_of(&[(1, false), (2, true)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn add_prefers_override_then_template_then_default() {
        let (types, components, health, name) = registries();
        let mut archetype = Archetype::new(
            &types,
            &components,
            7,
            vec![(health, false), (name, false)],
            ArchetypeChunkSize::Dozens,
        );

        let mut template = ComponentMap::new();
        template.insert(health, ComponentValue::new(10i32));
        template.insert(name, ComponentValue::new(String::from("brick")));

        let mut overrides = ComponentMap::new();
        overrides.insert(health, ComponentValue::new(99i32));
        let row = archetype.add_entity(&template, &mut overrides);
        assert!(overrides.is_empty());
        assert_eq!(archetype.get_component::<i32>(health, row), Some(&99));
        assert_eq!(archetype.get_component::<String>(name, row).map(String::as_str), Some("brick"));

        let mut wrong = ComponentMap::new();
        wrong.insert(health, ComponentValue::new(1.5f32));
        let row = archetype.add_entity(&template, &mut wrong);
        assert_eq!(archetype.get_component::<i32>(health, row), Some(&10));

        let row = archetype.add_entity(&ComponentMap::new(), &mut ComponentMap::new());
        assert_eq!(archetype.get_component::<i32>(health, row), Some(&0));
        assert_eq!(archetype.entity_count(), 3);
    }

    #[test]
    fn remove_swaps_last_row_into_hole() {
        let (types, components, health, _) = registries();
        let mut archetype = Archetype::new(&types, &components, 1, vec![(health, true)], ArchetypeChunkSize::Dozens);
        let template = ComponentMap::new();
        for value in 0..40i32 {
            let mut overrides = ComponentMap::new();
            overrides.insert(health, ComponentValue::new(value));
            archetype.add_entity(&template, &mut overrides);
        }
        assert_eq!(archetype.chunk_count(), 2);
        assert_eq!(archetype.rows_in_chunk(1), 8);

        archetype.mark_tracked_dirty(&[0], Some(39));
        assert_eq!(archetype.remove_entity(3), Some(39));
        assert_eq!(archetype.entity_count(), 39);
        assert_eq!(archetype.get_component::<i32>(health, 3), Some(&39));
        assert!(archetype.tracked_columns()[0].is_row_dirty(3));
        assert!(!archetype.tracked_columns()[0].is_row_dirty(39));

        assert_eq!(archetype.remove_entity(38), None);
        assert_eq!(archetype.entity_count(), 38);
    }

    #[test]
    fn batch_add_moves_vectors_and_seeds_shadows() {
        let (types, components, health, name) = registries();
        let mut archetype = Archetype::new(
            &types,
            &components,
            2,
            vec![(health, true), (name, false)],
            ArchetypeChunkSize::Dozens,
        );
        let mut template = ComponentMap::new();
        template.insert(name, ComponentValue::new(String::from("soa")));
        let mut overrides = ComponentVecMap::new();
        overrides.insert(health, crate::engine::value::ComponentVec::new((0..50i32).collect::<Vec<_>>()));

        let first = archetype.add_entities(&template, overrides, 50);
        assert_eq!(first, 0);
        assert_eq!(archetype.entity_count(), 50);
        assert_eq!(archetype.get_component::<i32>(health, 42), Some(&42));
        assert_eq!(archetype.get_component::<String>(name, 49).map(String::as_str), Some("soa"));

        let shadow = archetype.tracked_columns()[0].shadow();
        let seeded = unsafe { *shadow.get_data(42).cast::<i32>() };
        assert_eq!(seeded, 42);
    }

    #[test]
    fn untrackable_component_is_stored_untracked() {
        let (types, components, _, name) = registries();
        let archetype = Archetype::new(&types, &components, 3, vec![(name, true)], ArchetypeChunkSize::Dozens);
        assert!(archetype.has_component(name));
        assert!(archetype.tracked_columns().is_empty());
    }

    #[test]
    fn unknown_type_is_left_out() {
        let (types, components, health, _) = registries();
        let unknown = component_id_of(0xABCD, "ghost");
        let archetype = Archetype::new(
            &types,
            &components,
            4,
            vec![(health, false), (unknown, false)],
            ArchetypeChunkSize::Dozens,
        );
        assert!(archetype.has_component(health));
        assert!(!archetype.has_component(unknown));
    }
}
