//! Change detection for tracked components.
//!
//! A tracked component keeps a shadow copy of its last observed value. Writes
//! only mark rows dirty; the actual comparison happens in an explicit
//! tracking pass:
//!
//! ```text
//! CLEAN ──write──► SOME-DIRTY / ALL-DIRTY ──tracking pass──► CLEAN
//! ```
//!
//! During the pass every dirty row of every non-clean tracked column is
//! compared against its shadow with the type's compare-and-assign operation,
//! which also commits the new value. The result is one change mask per row,
//! one bit per tracked column, which the manager turns into [`OnTrack`]
//! notifications.
//!
//! Large archetypes compare rows in parallel with `rayon`; the returned change
//! list is always in ascending row order so that notifications stay
//! deterministic.
//!
//! [`OnTrack`]: crate::engine::events::OnTrack

use log::error;
use rayon::prelude::*;

use crate::engine::archetype::{Archetype, TrackedEvent};
use crate::engine::storage::{Column, DirtyState, TrackedColumn};
use crate::engine::types::{ComponentID, RowID, TrackMask, MAX_TRACKED_COMPONENTS};

/// Runs compare-and-assign over the dirty rows of one tracked column.
///
/// Returns the rows whose value changed, in ascending order.

fn changed_rows(source: &Column, tracked: &TrackedColumn, entity_count: u32, parallel: bool) -> Vec<RowID> {
    let Some(compare_and_assign) = source.ops().compare_and_assign else {
        return Vec::new();
    };
    let shadow = tracked.shadow();
    let compare = |row: RowID| {
        if !tracked.is_row_dirty(row) {
            return false;
        }
        // SAFETY: `row` is live in both columns; each row is visited by exactly one task.
        unsafe { compare_and_assign(source.get_data(row), shadow.get_data(row)) }
    };

    if parallel {
        (0..entity_count).into_par_iter().filter(|&row| compare(row)).collect()
    } else {
        (0..entity_count).filter(|&row| compare(row)).collect()
    }
}

/// Compares every dirty tracked column of `archetype` and resets its dirty state.
///
/// ## Behavior
/// - Archetypes without change subscriptions or without tracked columns are
///   skipped entirely; their dirty state is left as is.
/// - Returns `(row, mask)` for every row with at least one changed column,
///   sorted by row.

pub fn compute_changes(archetype: &mut Archetype, parallel_min_rows: usize) -> Vec<(RowID, TrackMask)> {
    if archetype.tracked_events().is_empty() || archetype.tracked_columns().is_empty() {
        return Vec::new();
    }
    let (columns, tracked_columns, entity_count) = archetype.tracking_parts();
    let parallel = entity_count as usize >= parallel_min_rows;

    let mut masks: Vec<TrackMask> = Vec::new();
    for (bit, tracked) in tracked_columns.iter_mut().enumerate() {
        if tracked.state() == DirtyState::Clean {
            continue;
        }
        let rows = changed_rows(&columns[tracked.source_column()], tracked, entity_count, parallel);
        tracked.reset_dirty();
        if rows.is_empty() {
            continue;
        }
        if masks.is_empty() {
            masks.resize(entity_count as usize, 0);
        }
        for row in rows {
            masks[row as usize] |= 1 << bit;
        }
    }

    masks
        .into_iter()
        .enumerate()
        .filter(|&(_, mask)| mask != 0)
        .map(|(row, mask)| (row as RowID, mask))
        .collect()
}

/// Subscribes event handler `handler` to changes of `tracked` in `archetype`.
///
/// ## Behavior
/// - Builds a mask over the archetype's tracked columns for every listed
///   component the archetype tracks.
/// - A listed component that the archetype stores untracked is logged.
/// - Registers the subscription only when the mask is non-zero.
///
/// Returns `true` if a subscription was added.

pub fn try_registrate_track(archetype: &mut Archetype, handler: usize, handler_name: &str, tracked: &[ComponentID]) -> bool {
    let mut mask: TrackMask = 0;
    for &component_id in tracked {
        match archetype.tracked_index(component_id) {
            Some(index) if index < MAX_TRACKED_COMPONENTS => mask |= 1 << index,
            Some(index) => error!(
                "Handler `{handler_name}` observes tracked column {index} of archetype {:#x}, beyond the {MAX_TRACKED_COMPONENTS} supported",
                archetype.archetype_id()
            ),
            None if archetype.has_component(component_id) => error!(
                "Handler `{handler_name}` tracks component {component_id:#x}, which archetype {:#x} stores untracked",
                archetype.archetype_id()
            ),
            None => {}
        }
    }
    if mask == 0 {
        return false;
    }
    archetype.add_tracked_event(TrackedEvent { handler, mask });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::ComponentRegistry;
    use crate::engine::type_registry::{TypeDeclaration, TypeRegistry};
    use crate::engine::types::ArchetypeChunkSize;
    use crate::engine::value::{ComponentMap, ComponentValue};

    fn tracked_archetype(rows: i32) -> (Archetype, ComponentID, ComponentID) {
        let mut types = TypeRegistry::new();
        let mut components = ComponentRegistry::new();
        let int = types.register(TypeDeclaration::tracked::<i32>("int")).unwrap();
        let hp = components.get_or_add(int, "hp").unwrap();
        let mana = components.get_or_add(int, "mana").unwrap();
        let mut archetype = Archetype::new(
            &types,
            &components,
            9,
            vec![(hp, true), (mana, true)],
            ArchetypeChunkSize::Dozens,
        );
        for value in 0..rows {
            let mut overrides = ComponentMap::new();
            overrides.insert(hp, ComponentValue::new(value));
            overrides.insert(mana, ComponentValue::new(value));
            archetype.add_entity(&ComponentMap::new(), &mut overrides);
        }
        (archetype, hp, mana)
    }

    #[test]
    fn unsubscribed_archetype_is_skipped() {
        let (mut archetype, hp, _) = tracked_archetype(4);
        *archetype.get_component_mut::<i32>(hp, 1).unwrap() = 100;
        assert!(compute_changes(&mut archetype, usize::MAX).is_empty());
        assert!(!archetype.tracked_columns()[0].is_clean());
    }

    #[test]
    fn only_changed_values_are_reported() {
        let (mut archetype, hp, mana) = tracked_archetype(8);
        assert!(try_registrate_track(&mut archetype, 0, "watch", &[hp, mana]));

        *archetype.get_component_mut::<i32>(hp, 2).unwrap() = 2;
        assert!(compute_changes(&mut archetype, usize::MAX).is_empty());

        *archetype.get_component_mut::<i32>(hp, 3).unwrap() = 30;
        *archetype.get_component_mut::<i32>(mana, 3).unwrap() = 31;
        *archetype.get_component_mut::<i32>(mana, 5).unwrap() = 50;
        assert_eq!(compute_changes(&mut archetype, usize::MAX), vec![(3, 0b11), (5, 0b10)]);
        assert!(compute_changes(&mut archetype, usize::MAX).is_empty());
    }

    #[test]
    fn parallel_pass_matches_sequential_pass() {
        let (mut archetype, hp, _) = tracked_archetype(40);
        try_registrate_track(&mut archetype, 0, "watch", &[hp]);
        for row in (0..40).step_by(3) {
            *archetype.get_component_mut::<i32>(hp, row).unwrap() += 1;
        }
        archetype.mark_tracked_dirty(&[0], None);
        let changes = compute_changes(&mut archetype, 1);
        let expected: Vec<_> = (0..40).step_by(3).map(|row| (row, 0b01)).collect();
        assert_eq!(changes, expected);
    }
}
