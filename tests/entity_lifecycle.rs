// Run:
//   cargo test --test entity_lifecycle -- --nocapture

mod common;

use common::*;
use log::Level;

use archetype_ecs::prelude::*;
use archetype_ecs::{EcsError, EntityState, ENTITY_ID_COMPONENT_NAME};

fn tagged_world() -> (EcsManager, u32) {
    let mut ecs = world();
    let template = ecs.register_template(
        TemplateDescription::new("tagged").with("tag", 0i32).with("position", Float3::default()),
    );
    (ecs, template)
}

#[test]
fn destroyed_handles_are_stale_and_indices_are_recycled() {
    let (mut ecs, template) = tagged_world();

    let first = ecs.create_entity(template, InitializerList::new());
    assert!(ecs.is_alive(first));
    assert!(ecs.destroy_entity(first));
    assert!(!ecs.is_alive(first));
    assert!(!ecs.can_access(first));

    let second = ecs.create_entity(template, InitializerList::new());
    assert_eq!(second.index(), first.index());
    assert_ne!(second.generation(), first.generation());
    assert!(ecs.is_alive(second));
    assert!(!ecs.is_alive(first));

    assert!(matches!(ecs.try_destroy_entity(first), Err(EcsError::StaleEntity(_))));
    assert!(ecs.get_component::<i32>(first, "tag").is_none());
}

#[test]
fn removing_rows_keeps_every_survivor_addressing_its_own_data() {
    let (mut ecs, template) = tagged_world();

    let entities: Vec<EntityId> = (0..50)
        .map(|i| ecs.create_entity(template, InitializerList::new().with("tag", i)))
        .collect();
    let archetype_id = ecs.template(template).map(|t| t.archetype_id()).unwrap();

    for victim in [0usize, 17, 49, 25] {
        let before = ecs.archetype(archetype_id).unwrap().entity_count();
        assert!(ecs.destroy_entity(entities[victim]));
        assert_eq!(ecs.archetype(archetype_id).unwrap().entity_count(), before - 1);
    }

    for (i, &entity) in entities.iter().enumerate() {
        if [0usize, 17, 49, 25].contains(&i) {
            assert!(!ecs.can_access(entity));
            continue;
        }
        assert_eq!(ecs.get_component::<i32>(entity, "tag"), Some(&(i as i32)));
        assert_eq!(ecs.get_component::<EntityId>(entity, ENTITY_ID_COMPONENT_NAME), Some(&entity));
    }
}

#[test]
fn batch_creation_uses_column_initializers() {
    let (mut ecs, template) = tagged_world();
    let tags: Vec<i32> = (100..110).collect();

    let entities = ecs.create_entities(template, 10, InitializerSoaList::new().with("tag", tags));
    assert_eq!(entities.len(), 10);
    for (offset, &entity) in entities.iter().enumerate() {
        assert_eq!(ecs.get_component::<i32>(entity, "tag"), Some(&(100 + offset as i32)));
        assert_eq!(ecs.get_component::<Float3>(entity, "position"), Some(&Float3::default()));
    }
}

#[test]
fn batch_size_is_clamped_to_the_shortest_column() {
    capture_logs();
    let (mut ecs, template) = tagged_world();

    let entities = ecs.create_entities(template, 8, InitializerSoaList::new().with("tag", vec![1i32, 2, 3]));
    assert_eq!(entities.len(), 3);
    assert!(logged_contains(Level::Warn, "shortest column"));
}

#[test]
fn unknown_template_yields_invalid_handle() {
    capture_logs();
    let mut ecs = world();

    let entity = ecs.create_entity(0xdead_beef, InitializerList::new());
    assert!(!entity.is_valid());
    assert!(matches!(
        ecs.try_create_entity(0xdead_beef, InitializerList::new()),
        Err(EcsError::UnknownTemplate(0xdead_beef))
    ));
    assert!(!logged(Level::Error).is_empty());
}

#[test]
fn mismatching_initializer_falls_back_to_template_default() {
    capture_logs();
    let (mut ecs, template) = tagged_world();

    let entity = ecs.create_entity(template, InitializerList::new().with("tag", 1.5f32).with("unknown", 3i32));
    assert!(ecs.is_alive(entity));
    assert_eq!(ecs.get_component::<i32>(entity, "tag"), Some(&0));
    assert!(!logged(Level::Error).is_empty() || !logged(Level::Warn).is_empty());
}

#[test]
fn deferred_creation_materialises_at_flush() {
    let (mut ecs, template) = tagged_world();

    let entity = ecs.create_entity_deferred(template, InitializerList::new().with("tag", 7i32));
    assert_eq!(ecs.entity_state(entity), EntityState::AsyncCreation);
    assert!(ecs.is_alive(entity));
    assert!(!ecs.can_access(entity));
    assert!(ecs.get_component::<i32>(entity, "tag").is_none());

    ecs.flush();
    assert_eq!(ecs.entity_state(entity), EntityState::Alive);
    assert_eq!(ecs.get_component::<i32>(entity, "tag"), Some(&7));
}

#[test]
fn deferred_destruction_keeps_data_readable_until_flush() {
    let (mut ecs, template) = tagged_world();
    let entity = ecs.create_entity(template, InitializerList::new().with("tag", 3i32));

    assert!(ecs.destroy_entity_deferred(entity));
    assert_eq!(ecs.entity_state(entity), EntityState::AsyncDestroy);
    assert!(!ecs.is_alive(entity));
    assert_eq!(ecs.get_component::<i32>(entity, "tag"), Some(&3));
    assert!(!ecs.destroy_entity_deferred(entity));

    ecs.flush_entities();
    assert_eq!(ecs.entity_state(entity), EntityState::Dead);
    assert_eq!(ecs.entity_count(), 0);
}

#[test]
fn destroying_a_pending_creation_skips_it() {
    let (mut ecs, template) = tagged_world();
    let archetype_id = ecs.template(template).map(|t| t.archetype_id()).unwrap();

    let kept = ecs.create_entities_deferred(template, 4, InitializerSoaList::new().with("tag", vec![0i32, 1, 2, 3]));
    let dropped = ecs.create_entity_deferred(template, InitializerList::new());
    assert!(ecs.destroy_entity_deferred(kept[1]));
    assert!(ecs.destroy_entity_deferred(dropped));
    assert_eq!(ecs.entity_state(dropped), EntityState::Dead);

    ecs.flush();
    assert_eq!(ecs.archetype(archetype_id).unwrap().entity_count(), 3);
    for &i in &[0usize, 2, 3] {
        assert_eq!(ecs.get_component::<i32>(kept[i], "tag"), Some(&(i as i32)));
    }
    assert!(!ecs.can_access(kept[1]));
    assert!(!ecs.can_access(dropped));
}

#[test]
fn destructions_are_applied_before_creations() {
    let (mut ecs, template) = tagged_world();
    let old = ecs.create_entity(template, InitializerList::new());

    let fresh = ecs.create_entity_deferred(template, InitializerList::new());
    ecs.destroy_entity_deferred(old);
    ecs.flush();

    assert!(!ecs.can_access(old));
    assert!(ecs.can_access(fresh));
    assert_eq!(ecs.entity_count(), 1);
}

#[test]
fn eid_component_is_read_only() {
    let (mut ecs, template) = tagged_world();
    let entity = ecs.create_entity(template, InitializerList::new());

    assert!(matches!(
        ecs.try_get_component_mut::<EntityId>(entity, ENTITY_ID_COMPONENT_NAME),
        Err(EcsError::ReadOnlyComponent(_))
    ));
    assert!(!ecs.set_component(entity, ENTITY_ID_COMPONENT_NAME, EntityId::INVALID));
    assert_eq!(ecs.get_component::<EntityId>(entity, ENTITY_ID_COMPONENT_NAME), Some(&entity));
}

#[test]
fn set_component_overwrites_in_place() {
    let (mut ecs, template) = tagged_world();
    let entity = ecs.create_entity(template, InitializerList::new());

    assert!(ecs.set_component(entity, "position", Float3::new(1.0, 2.0, 3.0)));
    assert_eq!(ecs.get_component::<Float3>(entity, "position"), Some(&Float3::new(1.0, 2.0, 3.0)));
    assert!(!ecs.set_component(entity, "missing", 1i32));
}
