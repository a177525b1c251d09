#![allow(dead_code)]

use archetype_ecs::prelude::*;
use archetype_ecs::TemplateID;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;
pub const AGENTS_LARGE: usize = 1_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Productivity {
    pub rate: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clock {
    pub dt: f32,
}

/// A manager with the agent types and the `agent` template registered.
pub fn make_world() -> (EcsManager, TemplateID) {
    let mut ecs = EcsManager::new(EcsConfig::default());
    ecs.register_type(TypeDeclaration::of::<Position>("Position"));
    ecs.register_type(TypeDeclaration::tracked::<Wealth>("Wealth"));
    ecs.register_type(TypeDeclaration::of::<Productivity>("Productivity"));
    ecs.register_type(TypeDeclaration::of::<Clock>("Clock").singleton());
    if let Some(clock) = ecs.singleton_mut::<Clock>() {
        clock.dt = 0.1;
    }

    let template = ecs.register_template(
        TemplateDescription::new("agent")
            .with("position", Position { x: 0.0, y: 0.0 })
            .tracked("wealth", Wealth { value: 100.0 })
            .with("productivity", Productivity { rate: 1.0 }),
    );
    (ecs, template)
}

/// Creates `agent_count` agents in one batch.
pub fn populate(ecs: &mut EcsManager, template: TemplateID, agent_count: usize) -> Vec<EntityId> {
    ecs.create_entities(template, agent_count, InitializerSoaList::new())
}

/// A populated manager.
pub fn setup_world(agent_count: usize) -> (EcsManager, TemplateID) {
    let (mut ecs, template) = make_world();
    populate(&mut ecs, template, agent_count);
    (ecs, template)
}
