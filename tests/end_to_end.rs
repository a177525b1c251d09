// Run:
//   cargo test --test end_to_end -- --nocapture

mod common;

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use common::*;
use log::Level;

use archetype_ecs::prelude::*;
use archetype_ecs::Plugin;

const DT: f32 = 0.1;

/// Registers the integration system reading `dt` from the `Time` singleton.
fn movement(ecs: &mut EcsManager) {
    ecs.register_system(
        QueryDescription::new("integrate")
            .write::<Float3>("position")
            .read::<Float3>("velocity")
            .read::<Time>("time"),
        FnSystem::new(|view, _| {
            let mut position = view.write::<Float3>(0);
            let velocity = view.read::<Float3>(1);
            let time = view.read::<Time>(2);
            for row in 0..view.len() {
                let (Some(p), Some(v), Some(t)) = (position.get_mut(row), velocity.get(row), time.get(row)) else {
                    continue;
                };
                p.x += v.x * t.dt;
                p.y += v.y * t.dt;
                p.z += v.z * t.dt;
            }
        }),
    );
}

#[test]
fn one_tick_integrates_position_and_destroy_invalidates_the_handle() {
    let mut ecs = world();
    let template = body_template(&mut ecs);
    movement(&mut ecs);
    ecs.singleton_mut::<Time>().unwrap().dt = DT;
    ecs.topological_sort().unwrap();

    let entity = ecs.create_entity(
        template,
        InitializerList::new()
            .with("position", Float3::new(1.0, 2.0, 3.0))
            .with("velocity", Float3::new(4.0, 5.0, 6.0)),
    );
    let bystander = ecs.create_entity(template, InitializerList::new());
    ecs.update_systems();

    let position = *ecs.get_component::<Float3>(entity, "position").unwrap();
    assert_relative_eq!(position.x, 1.0 + 4.0 * DT);
    assert_relative_eq!(position.y, 2.0 + 5.0 * DT);
    assert_relative_eq!(position.z, 3.0 + 6.0 * DT);

    let archetype_id = ecs.template(template).unwrap().archetype_id();
    assert!(ecs.destroy_entity(entity));
    assert!(!ecs.is_alive(entity));
    assert!(ecs.get_component::<Float3>(entity, "position").is_none());

    let archetype = ecs.archetype(archetype_id).unwrap();
    assert_eq!(archetype.entity_count(), 1);
    assert_eq!(ecs.get_component::<Float3>(bystander, "position"), Some(&Float3::default()));
    assert_eq!(ecs.entity_location(bystander).map(|(_, row)| row), Some(0));
}

#[test]
fn appear_and_disappear_bracket_the_entity_lifetime() {
    let mut ecs = world();
    let template = body_template(&mut ecs);
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    ecs.register_event_handler(
        EventHandlerDescription::new(QueryDescription::new("lifecycle").read::<Float3>("position"))
            .on::<OnAppear>()
            .on::<OnDisappear>(),
        FnEventHandler::new(move |view, event, _| {
            let position = view.read::<Float3>(0);
            for row in 0..view.len() {
                let x = position.get(row).map_or(f32::NAN, |p| p.x);
                sink.lock().unwrap().push((event.name(), view.entity(row), x));
            }
        }),
    );

    let entity = ecs.create_entity(template, InitializerList::new().with("position", Float3::new(7.0, 0.0, 0.0)));
    ecs.destroy_entity(entity);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!((log[0].0, log[0].1), ("OnAppear", entity));
    assert_eq!((log[1].0, log[1].1), ("OnDisappear", entity));
    assert_relative_eq!(log[1].2, 7.0);
}

#[derive(Clone, Copy, Debug)]
struct Damage {
    amount: i32,
}

impl EventType for Damage {
    const NAME: &'static str = "Damage";
}

fn combat_plugin(ecs: &mut EcsManager) {
    ecs.register_template(TemplateDescription::new("soldier").with("hp", 10i32));
    let corpse = ecs.register_template(TemplateDescription::new("corpse").with("remains", 1i32));
    ecs.register_event_handler(
        EventHandlerDescription::new(QueryDescription::new("take_damage").write::<i32>("hp")).on::<Damage>(),
        FnEventHandler::new(move |view, event, commands| {
            let Some(damage) = event.cast::<Damage>() else {
                return;
            };
            let mut hp = view.write::<i32>(0);
            for row in 0..view.len() {
                let Some(hp) = hp.get_mut(row) else { continue };
                *hp -= damage.amount;
                if *hp <= 0 {
                    commands.destroy_entity(view.entity(row));
                    commands.create_entity(corpse, InitializerList::new());
                }
            }
        }),
    );
}

#[test]
fn deferred_events_and_commands_apply_at_flush() {
    let plugins: [&dyn Plugin; 2] = [&register_types, &combat_plugin];
    let mut ecs = EcsManager::with_plugins(EcsConfig::default(), plugins);
    let soldier = ecs.template_by_name("soldier").unwrap().template_id();
    let corpse = ecs.template_by_name("corpse").unwrap().archetype_id();

    let soldiers = ecs.create_entities(soldier, 3, InitializerSoaList::new().with("hp", vec![10i32, 4, 10]));

    ecs.send_event(Damage { amount: 5 });
    assert_eq!(ecs.get_component::<i32>(soldiers[1], "hp"), Some(&4));

    ecs.flush();
    assert_eq!(ecs.get_component::<i32>(soldiers[0], "hp"), Some(&5));
    assert!(!ecs.is_alive(soldiers[1]));
    assert!(ecs.can_access(soldiers[1]));
    assert_eq!(ecs.archetype(corpse).unwrap().entity_count(), 0);

    ecs.flush();
    assert!(!ecs.can_access(soldiers[1]));
    assert_eq!(ecs.archetype(corpse).unwrap().entity_count(), 1);

    ecs.send_event_to(soldiers[2], Damage { amount: 10 });
    ecs.flush();
    ecs.flush();
    assert!(!ecs.can_access(soldiers[2]));
    assert_eq!(ecs.get_component::<i32>(soldiers[0], "hp"), Some(&5));
    assert_eq!(ecs.archetype(corpse).unwrap().entity_count(), 2);
}

#[test]
fn immediate_targeted_events_reach_only_their_target() {
    let plugins: [&dyn Plugin; 2] = [&register_types, &combat_plugin];
    let mut ecs = EcsManager::with_plugins(EcsConfig::default(), plugins);
    let soldier = ecs.template_by_name("soldier").unwrap().template_id();
    let a = ecs.create_entity(soldier, InitializerList::new());
    let b = ecs.create_entity(soldier, InitializerList::new());

    assert!(ecs.send_event_immediate_to(a, &Damage { amount: 3 }));
    assert_eq!(ecs.get_component::<i32>(a, "hp"), Some(&7));
    assert_eq!(ecs.get_component::<i32>(b, "hp"), Some(&10));

    capture_logs();
    ecs.destroy_entity(b);
    assert!(!ecs.send_event_immediate_to(b, &Damage { amount: 3 }));
    assert!(logged_contains(Level::Warn, "Event `Damage`"));
    assert!(logged_contains(Level::Warn, "stale or dead"));
}

#[test]
fn queued_event_for_a_destroyed_target_is_dropped_with_a_warning() {
    let plugins: [&dyn Plugin; 2] = [&register_types, &combat_plugin];
    let mut ecs = EcsManager::with_plugins(EcsConfig::default(), plugins);
    let soldier = ecs.template_by_name("soldier").unwrap().template_id();
    let a = ecs.create_entity(soldier, InitializerList::new());
    let b = ecs.create_entity(soldier, InitializerList::new());

    ecs.send_event_to(b, Damage { amount: 3 });
    ecs.destroy_entity(b);
    capture_logs();
    ecs.flush();

    assert_eq!(ecs.get_component::<i32>(a, "hp"), Some(&10));
    let warnings = logged(Level::Warn);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("Event `Damage`") && warnings[0].contains("stale or dead"));
}

#[test]
fn dropping_the_manager_releases_owned_component_data() {
    let marker = Arc::new(());
    {
        let mut ecs = world();
        ecs.register_type(TypeDeclaration::of::<Arc<()>>("shared"));
        let template = ecs.register_template(TemplateDescription::new("holder").with("handle", Arc::clone(&marker)));
        ecs.create_entities(template, 10, InitializerSoaList::new());
        assert_eq!(Arc::strong_count(&marker), 12);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
}
