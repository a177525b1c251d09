// Run:
//   cargo test --test templates -- --nocapture

mod common;

use common::*;
use log::Level;

use archetype_ecs::engine::hash::fnv_hash_str;
use archetype_ecs::prelude::*;
use archetype_ecs::EcsError;

#[test]
fn identical_component_sets_share_one_archetype() {
    let mut ecs = world();

    let forward = ecs.register_template(
        TemplateDescription::new("forward").with("a", 1i32).with("b", 2.0f32).with("c", Float3::default()),
    );
    let backward = ecs.register_template(
        TemplateDescription::new("backward").with("c", Float3::default()).with("b", 0.0f32).with("a", 9i32),
    );
    let smaller = ecs.register_template(TemplateDescription::new("smaller").with("a", 1i32).with("b", 2.0f32));

    let archetype_of = |ecs: &EcsManager, id| ecs.template(id).map(|t| t.archetype_id()).unwrap();
    assert_eq!(archetype_of(&ecs, forward), archetype_of(&ecs, backward));
    assert_ne!(archetype_of(&ecs, forward), archetype_of(&ecs, smaller));
    assert_eq!(ecs.archetypes().len(), 2);
}

#[test]
fn tracked_flag_is_part_of_archetype_identity() {
    let mut ecs = world();
    let plain = ecs.register_template(TemplateDescription::new("plain").with("hp", 1i32));
    let tracked = ecs.register_template(TemplateDescription::new("tracked").tracked("hp", 1i32));

    let plain = ecs.template(plain).unwrap();
    let tracked = ecs.template(tracked).unwrap();
    assert_ne!(plain.archetype_id(), tracked.archetype_id());
}

#[test]
fn child_overrides_win_and_the_rest_is_inherited() {
    let mut ecs = world();
    ecs.register_template(
        TemplateDescription::new("brick").with("health", 10i32).with("name", String::from("brick")),
    );
    let child = ecs.register_template(TemplateDescription::new("hard_brick").parent("brick").with("health", 100i32));

    let entity = ecs.create_entity(child, InitializerList::new());
    assert_eq!(ecs.get_component::<i32>(entity, "health"), Some(&100));
    assert_eq!(ecs.get_component::<String>(entity, "name").map(String::as_str), Some("brick"));

    let template = ecs.template(child).unwrap();
    assert_eq!(template.parents().len(), 1);
    let health = ecs.component_id::<i32>("health").unwrap();
    assert_eq!(template.default_value::<i32>(health), Some(&100));
}

#[test]
fn diamond_inheritance_prefers_the_first_parent() {
    let mut ecs = world();
    ecs.register_template(TemplateDescription::new("left").with("speed", 1.0f32).with("armor", 5i32));
    ecs.register_template(TemplateDescription::new("right").with("speed", 2.0f32).tracked("armor", 7i32));
    let both = ecs.register_template(TemplateDescription::new("both").parent("left").parent("right"));

    let template = ecs.template(both).unwrap();
    let speed = ecs.component_id::<f32>("speed").unwrap();
    let armor = ecs.component_id::<i32>("armor").unwrap();
    assert_eq!(template.default_value::<f32>(speed), Some(&1.0));
    assert_eq!(template.default_value::<i32>(armor), Some(&5));
    assert!(template.is_tracked(armor));
}

#[test]
fn unknown_parent_is_logged_and_skipped() {
    capture_logs();
    let mut ecs = world();
    let orphan = ecs.register_template(TemplateDescription::new("orphan").parent("nobody").with("x", 1i32));

    let template = ecs.template(orphan).unwrap();
    assert!(template.parents().is_empty());
    assert!(logged_contains(Level::Error, "nobody"));
}

#[test]
fn duplicate_template_names_keep_the_first_registration() {
    capture_logs();
    let mut ecs = world();
    let first = ecs.register_template(TemplateDescription::new("unit").with("x", 1i32));
    let second = ecs.register_template(TemplateDescription::new("unit").with("y", 1.0f32));

    assert_eq!(first, second);
    assert!(ecs.component_id::<f32>("y").is_none());
    assert!(logged_contains(Level::Warn, "already registered"));
}

#[test]
fn chunk_size_is_inherited_unless_overridden() {
    let mut ecs = world();
    ecs.register_template(TemplateDescription::new("swarm").with("x", 1i32).chunk_size(ArchetypeChunkSize::Thousands));
    let drone = ecs.register_template(TemplateDescription::new("drone").parent("swarm").with("y", 1.0f32));
    let boss = ecs.register_template(
        TemplateDescription::new("boss").parent("swarm").with("z", 1.0f32).chunk_size(ArchetypeChunkSize::Medium),
    );

    assert_eq!(ecs.template(drone).unwrap().chunk_size(), ArchetypeChunkSize::Thousands);
    assert_eq!(ecs.template(boss).unwrap().chunk_size(), ArchetypeChunkSize::Medium);
    let archetype = ecs.archetype(ecs.template(boss).unwrap().archetype_id()).unwrap();
    assert_eq!(archetype.chunk_size(), ArchetypeChunkSize::Medium);
}

#[test]
fn untrackable_type_is_stored_untracked() {
    capture_logs();
    let mut ecs = world();
    let template = ecs.register_template(TemplateDescription::new("opaque").tracked("blob", Opaque(3)));
    let archetype = ecs.archetype(ecs.template(template).unwrap().archetype_id()).unwrap();

    assert!(archetype.tracked_columns().is_empty());
    assert!(!logged(Level::Error).is_empty());
    let entity = ecs.create_entity(template, InitializerList::new());
    assert_eq!(ecs.get_component::<Opaque>(entity, "blob").map(|o| o.0), Some(3));
}

#[test]
fn unregistered_value_type_drops_the_component() {
    capture_logs();
    let mut ecs = world();
    let template = ecs.register_template(TemplateDescription::new("odd").with("x", 1i32).with("flag", true));

    assert_eq!(ecs.template(template).unwrap().components().len(), 2);
    assert!(logged_contains(Level::Error, "odd"));
}

#[test]
fn registering_a_type_under_a_second_name_keeps_the_first() {
    let mut ecs = world();
    let template = ecs.register_template(TemplateDescription::new("unit").with("hp", 5i32));
    let unit = ecs.create_entity(template, InitializerList::new());

    let err = ecs.try_register_type(TypeDeclaration::of::<i32>("number")).unwrap_err();
    assert!(matches!(err, EcsError::RustTypeAlreadyBound { .. }));
    assert_eq!(ecs.types().type_id_of::<i32>(), Some(fnv_hash_str("int")));
    assert!(ecs.types().get(fnv_hash_str("number")).is_none());
    assert_eq!(ecs.get_component::<i32>(unit, "hp"), Some(&5));

    capture_logs();
    ecs.register_type(TypeDeclaration::tracked::<i32>("number"));
    assert!(logged_contains(Level::Error, "already registered as type `int`"));
    assert_eq!(ecs.get_component::<i32>(unit, "hp"), Some(&5));
}
