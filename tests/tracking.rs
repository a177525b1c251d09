// Run:
//   cargo test --test tracking -- --nocapture

mod common;

use std::sync::{Arc, Mutex};

use common::*;

use archetype_ecs::prelude::*;

type Seen = Arc<Mutex<Vec<(EntityId, u32)>>>;

/// Registers a handler recording every `OnTrack` it receives.
fn watch(ecs: &mut EcsManager, name: &str, tracked: &[&str]) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let mut description = EventHandlerDescription::new(QueryDescription::new(name).read::<i32>("hp"));
    for component in tracked {
        description = description.track::<i32>(component);
    }
    ecs.register_event_handler(
        description,
        FnEventHandler::new(move |view, event, _| {
            if let Some(track) = event.cast::<OnTrack>() {
                let mut sink = sink.lock().unwrap();
                for row in 0..view.len() {
                    sink.push((view.entity(row), track.mask));
                }
            }
        }),
    );
    seen
}

fn unit_template(ecs: &mut EcsManager) -> u32 {
    ecs.register_template(TemplateDescription::new("unit").tracked("hp", 5i32).tracked("mana", 0i32))
}

#[test]
fn rewriting_the_same_value_is_not_a_change() {
    let mut ecs = world();
    let template = unit_template(&mut ecs);
    let seen = watch(&mut ecs, "watch_hp", &["hp"]);
    let entity = ecs.create_entity(template, InitializerList::new());

    assert_eq!(ecs.track_changes(), 0);
    assert!(ecs.set_component(entity, "hp", 5i32));
    assert_eq!(ecs.track_changes(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn a_real_change_fires_exactly_once() {
    let mut ecs = world();
    let template = unit_template(&mut ecs);
    let seen = watch(&mut ecs, "watch_hp", &["hp"]);
    let entity = ecs.create_entity(template, InitializerList::new());

    assert!(ecs.set_component(entity, "hp", 6i32));
    assert_eq!(ecs.track_changes(), 1);
    assert_eq!(ecs.track_changes(), 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, entity);
    assert_eq!(seen[0].1.count_ones(), 1);
}

#[test]
fn system_writes_mark_the_archetype_dirty() {
    let mut ecs = world();
    let template = unit_template(&mut ecs);
    let seen = watch(&mut ecs, "watch_hp", &["hp"]);
    let entities = ecs.create_entities(template, 40, InitializerSoaList::new());

    ecs.register_system(
        QueryDescription::new("poison").write::<i32>("hp"),
        FnSystem::new(|view, _| {
            let entities = view.entities().to_vec();
            let mut hp = view.write::<i32>(0);
            for (row, entity) in entities.iter().enumerate() {
                if entity.index() % 10 == 3 {
                    *hp.get_mut(row).unwrap() -= 1;
                }
            }
        }),
    );
    ecs.update_systems();

    assert_eq!(ecs.track_changes(), 4);
    let seen = seen.lock().unwrap();
    let expected: Vec<EntityId> = entities.iter().copied().filter(|e| e.index() % 10 == 3).collect();
    assert_eq!(seen.iter().map(|(e, _)| *e).collect::<Vec<_>>(), expected);
}

#[test]
fn masks_carry_only_the_subscribed_components() {
    let mut ecs = world();
    let template = unit_template(&mut ecs);
    let both = watch(&mut ecs, "watch_both", &["hp", "mana"]);
    let mana_only = watch(&mut ecs, "watch_mana", &["mana"]);
    let entity = ecs.create_entity(template, InitializerList::new());

    ecs.set_component(entity, "hp", 1i32);
    ecs.set_component(entity, "mana", 1i32);
    assert_eq!(ecs.track_changes(), 2);

    let both = both.lock().unwrap();
    let mana_only = mana_only.lock().unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].1.count_ones(), 2);
    assert_eq!(mana_only.len(), 1);
    assert_eq!(mana_only[0].1.count_ones(), 1);
    assert_ne!(mana_only[0].1 & both[0].1, 0);

    drop((both, mana_only));
    ecs.set_component(entity, "hp", 2i32);
    assert_eq!(ecs.track_changes(), 1);
}

#[test]
fn changes_are_reported_after_swap_removal() {
    let mut ecs = world();
    let template = unit_template(&mut ecs);
    let seen = watch(&mut ecs, "watch_hp", &["hp"]);
    let entities = ecs.create_entities(template, 3, InitializerSoaList::new());

    ecs.set_component(entities[2], "hp", 9i32);
    ecs.destroy_entity(entities[0]);
    assert_eq!(ecs.track_changes(), 1);
    assert_eq!(seen.lock().unwrap()[0].0, entities[2]);
}

#[test]
fn large_archetypes_compare_in_parallel_with_the_same_result() {
    let config = EcsConfig::default().with_parallel_tracking_min_rows(16);
    let mut ecs = EcsManager::new(config);
    register_types(&mut ecs);
    let template = unit_template(&mut ecs);
    let seen = watch(&mut ecs, "watch_hp", &["hp"]);
    let entities = ecs.create_entities(template, 2000, InitializerSoaList::new());

    for entity in entities.iter().step_by(7) {
        ecs.set_component(*entity, "hp", -1i32);
    }
    let expected: Vec<EntityId> = entities.iter().copied().step_by(7).collect();
    assert_eq!(ecs.track_changes(), expected.len());
    assert_eq!(seen.lock().unwrap().iter().map(|(e, _)| *e).collect::<Vec<_>>(), expected);
}
