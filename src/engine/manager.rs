//! ECS world management and execution layer.
//!
//! [`EcsManager`] is the composition root. It owns:
//!
//! * the type, component and template registries,
//! * every archetype and the singleton instances,
//! * the entity container,
//! * every query, system and event handler with its archetype cache,
//! * the deferred queue drained by [`EcsManager::flush`].
//!
//! ## Startup
//!
//! Registration is explicit. Types, components, templates, queries, systems
//! and handlers are registered directly or through [`Plugin`]s passed to
//! [`EcsManager::with_plugins`]; [`EcsManager::topological_sort`] then fixes
//! the execution order once.
//!
//! ## Frame
//!
//! A typical frame:
//!
//! ```ignore
//! ecs.update_systems();   // systems in scheduled order
//! ecs.track_changes();    // compare tracked columns, fire OnTrack
//! ecs.flush();            // deferred destructions, creations, then events
//! ```
//!
//! ## Error layering
//!
//! Every fallible operation has a `try_*` form returning [`EcsResult`]. The
//! plain form logs the error and degrades: an invalid handle, `false`, `None`
//! or an empty vector. Nothing here panics on bad input.
//!
//! ## Borrowing
//!
//! Callbacks run with shared access to the archetype they iterate and
//! exclusive access to the entity container and deferred queue (through
//! [`Commands`]). Methods that dispatch to callbacks destructure `self` so
//! these borrows stay disjoint.

use std::any::type_name;
use std::collections::HashMap;
use std::mem;

use log::{debug, error, info, warn};

use crate::engine::archetype::{archetype_id_of, normalize_components, Archetype};
use crate::engine::commands::{batch_count, Commands, DeferredCreation, DeferredQueue};
use crate::engine::component::{component_id_of, ComponentRegistry};
use crate::engine::config::{CyclePolicy, EcsConfig};
use crate::engine::entity::{
    EntityContainer, EntityId, EntityState, ENTITY_ID_COMPONENT, ENTITY_ID_COMPONENT_NAME, ENTITY_ID_TYPE_NAME,
};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::events::{Event, EventType, OnAppear, OnDisappear, OnTrack};
use crate::engine::hash::fnv_hash_str;
use crate::engine::query::{for_each_chunk, for_row, ChunkView, Query, QueryDescription};
use crate::engine::scheduler::{topological_sort, SortNode, SortReport};
use crate::engine::singleton::SingletonStorage;
use crate::engine::systems::{EventHandler, EventHandlerDescription, RegisteredHandler, RegisteredSystem, System};
use crate::engine::template::{resolve_component_key, Template, TemplateDescription, TemplateRegistry};
use crate::engine::tracking;
use crate::engine::type_registry::{TypeDeclaration, TypeRegistry};
use crate::engine::types::{ArchetypeChunkSize, ArchetypeID, ComponentID, EventID, RowID, TemplateID, TypeID};
use crate::engine::value::{ComponentMap, ComponentValue, ComponentVec, ComponentVecMap, InitializerList, InitializerSoaList};

/// Startup registration bundle.
///
/// Closures taking `&mut EcsManager` are plugins too.

pub trait Plugin {
    /// Registers types, components, templates, queries, systems and handlers.
    fn build(&self, manager: &mut EcsManager);
}

impl<F> Plugin for F
where
    F: Fn(&mut EcsManager),
{
    fn build(&self, manager: &mut EcsManager) {
        self(manager)
    }
}

/// Handle of a registered plain query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(usize);

/// Handle of a registered system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SystemId(usize);

/// Handle of a registered event handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

/// Owner of all ECS state.
pub struct EcsManager {
    config: EcsConfig,
    types: TypeRegistry,
    components: ComponentRegistry,
    singletons: SingletonStorage,
    entities: EntityContainer,
    archetypes: Vec<Archetype>,
    archetype_index: HashMap<ArchetypeID, usize>,
    templates: TemplateRegistry,
    queries: Vec<Query>,
    systems: Vec<RegisteredSystem>,
    system_order: Vec<usize>,
    handlers: Vec<RegisteredHandler>,
    handler_order: HashMap<EventID, Vec<usize>>,
    deferred: DeferredQueue,
}

/// Resolves single-entity initializers, logging and dropping the invalid ones.
fn resolve_overrides(
    init: InitializerList,
    types: &TypeRegistry,
    components: &ComponentRegistry,
    template: &Template,
) -> ComponentMap {
    let mut overrides = ComponentMap::with_capacity(init.len());
    for item in init {
        match resolve_component_key(&item.key, item.value.rust_type(), item.value.type_name(), types, components) {
            Ok(ENTITY_ID_COMPONENT) => {
                warn!("The eid component is assigned by the engine, the value for template `{}` is ignored", template.name())
            }
            Ok(component_id) if template.has_component(component_id) => {
                overrides.insert(component_id, item.value);
            }
            Ok(component_id) => warn!(
                "Component {component_id:#x} is not part of template `{}`, the value is ignored",
                template.name()
            ),
            Err(err) => error!("{err}, during create_entity from template `{}`", template.name()),
        }
    }
    overrides
}

/// Resolves batch initializers, logging and dropping the invalid ones.
fn resolve_soa_overrides(
    init: InitializerSoaList,
    types: &TypeRegistry,
    components: &ComponentRegistry,
    template: &Template,
) -> ComponentVecMap {
    let mut overrides = ComponentVecMap::with_capacity(init.len());
    for item in init {
        match resolve_component_key(&item.key, item.values.rust_type(), item.values.type_name(), types, components) {
            Ok(ENTITY_ID_COMPONENT) => {
                warn!("The eid component is assigned by the engine, the values for template `{}` are ignored", template.name())
            }
            Ok(component_id) if template.has_component(component_id) => {
                overrides.insert(component_id, item.values);
            }
            Ok(component_id) => warn!(
                "Component {component_id:#x} is not part of template `{}`, the values are ignored",
                template.name()
            ),
            Err(err) => error!("{err}, during create_entities from template `{}`", template.name()),
        }
    }
    overrides
}

impl EcsManager {
    /// Creates an empty manager.
    ///
    /// Registers the [`EntityId`] type and the `eid` component every template carries.

    pub fn new(config: EcsConfig) -> Self {
        let mut manager = Self {
            config,
            types: TypeRegistry::new(),
            components: ComponentRegistry::new(),
            singletons: SingletonStorage::new(),
            entities: EntityContainer::new(),
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            templates: TemplateRegistry::new(),
            queries: Vec::new(),
            systems: Vec::new(),
            system_order: Vec::new(),
            handlers: Vec::new(),
            handler_order: HashMap::new(),
            deferred: DeferredQueue::default(),
        };
        manager.register_type(TypeDeclaration::of::<EntityId>(ENTITY_ID_TYPE_NAME));
        manager.register_component::<EntityId>(ENTITY_ID_COMPONENT_NAME);
        manager
    }

    /// Creates a manager and applies every plugin in order.
    pub fn with_plugins<'p>(config: EcsConfig, plugins: impl IntoIterator<Item = &'p dyn Plugin>) -> Self {
        let mut manager = Self::new(config);
        for plugin in plugins {
            plugin.build(&mut manager);
        }
        manager
    }

    /// Applies one plugin.
    pub fn add_plugin(&mut self, plugin: &dyn Plugin) -> &mut Self {
        plugin.build(self);
        self
    }

    /// Active configuration.
    #[inline] pub fn config(&self) -> &EcsConfig { &self.config }
    /// Type registry.
    #[inline] pub fn types(&self) -> &TypeRegistry { &self.types }
    /// Component registry.
    #[inline] pub fn components(&self) -> &ComponentRegistry { &self.components }
    /// Template registry.
    #[inline] pub fn templates(&self) -> &TemplateRegistry { &self.templates }
    /// Every archetype, in creation order.
    #[inline] pub fn archetypes(&self) -> &[Archetype] { &self.archetypes }

    // ─────────────────────────────────────────────────────────────────────
    // Types and components
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a type; singleton types get their instance here.
    ///
    /// ## Errors
    /// - [`EcsError::ConflictingTypeRegistration`] if the name is taken by another Rust type.
    /// - [`EcsError::RustTypeAlreadyBound`] if the Rust type is registered under another name.

    pub fn try_register_type(&mut self, declaration: TypeDeclaration) -> EcsResult<TypeID> {
        let type_id = self.types.register(declaration)?;
        if let Some(declaration) = self.types.get(type_id) {
            if declaration.is_singleton() {
                self.singletons.get_or_create(declaration);
            }
            if self.config.is_verbose() {
                info!("Type `{}` registered as {type_id:#x} ({} bytes)", declaration.type_name(), declaration.size());
            }
        }
        Ok(type_id)
    }

    /// Like [`EcsManager::try_register_type`], logging failures.
    pub fn register_type(&mut self, declaration: TypeDeclaration) -> TypeID {
        let type_id = declaration.type_id();
        if let Err(err) = self.try_register_type(declaration) {
            error!("register_type failed: {err}");
        }
        type_id
    }

    /// Declares component `name` of the registered type `T`.
    ///
    /// ## Errors
    /// - [`EcsError::UnregisteredType`] if `T` was never registered.
    /// - [`EcsError::ConflictingComponentRegistration`] on an id collision.

    pub fn try_register_component<T: 'static>(&mut self, name: &str) -> EcsResult<ComponentID> {
        let type_id = self.types.type_id_of::<T>().ok_or(EcsError::UnregisteredType(type_name::<T>()))?;
        self.components.get_or_add(type_id, name)
    }

    /// Like [`EcsManager::try_register_component`], logging failures.
    pub fn register_component<T: 'static>(&mut self, name: &str) -> Option<ComponentID> {
        self.try_register_component::<T>(name)
            .map_err(|err| error!("register_component `{name}` failed: {err}"))
            .ok()
    }

    /// Id of the declared component `name` of type `T`.
    pub fn component_id<T: 'static>(&self, name: &str) -> Option<ComponentID> {
        let component_id = component_id_of(self.types.type_id_of::<T>()?, name);
        self.components.contains(component_id).then_some(component_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Templates and archetypes
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a template and creates its archetype if needed.
    ///
    /// ## Behavior
    /// - A name that is already registered is logged and the existing id is returned.
    /// - Inheritance is flattened here; see [`TemplateRegistry`].

    pub fn register_template(&mut self, description: TemplateDescription) -> TemplateID {
        let template_id = fnv_hash_str(description.name());
        if self.templates.contains(template_id) {
            warn!("Template `{}` is already registered", description.name());
            return template_id;
        }
        let flat = self.templates.flatten(description, &self.types, &mut self.components, self.config.default_chunk_size);
        let archetype_id = self.get_or_create_archetype(flat.components.clone(), flat.chunk_size);
        let template = flat.into_template(archetype_id);
        if self.config.is_verbose() {
            info!(
                "Template `{}` registered as {template_id:#x} with {} components in archetype {archetype_id:#x}",
                template.name(),
                template.components().len()
            );
        }
        self.templates.insert(template);
        template_id
    }

    /// Looks a template up by id.
    #[inline]
    pub fn template(&self, template_id: TemplateID) -> Option<&Template> {
        self.templates.get(template_id)
    }

    /// Looks a template up by name.
    #[inline]
    pub fn template_by_name(&self, name: &str) -> Option<&Template> {
        self.templates.get_by_name(name)
    }

    /// Looks an archetype up by id.
    #[inline]
    pub fn archetype(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetype_index.get(&archetype_id).map(|&i| &self.archetypes[i])
    }

    /// Returns the archetype for a component set, creating it on first use.
    ///
    /// ## Behavior
    /// A new archetype is matched against every registered query, system and
    /// event handler, and handlers observing tracked components subscribe to
    /// its changes.

    pub fn get_or_create_archetype(
        &mut self,
        components: Vec<(ComponentID, bool)>,
        chunk_size: ArchetypeChunkSize,
    ) -> ArchetypeID {
        let components = normalize_components(components);
        let archetype_id = archetype_id_of(&components);
        if self.archetype_index.contains_key(&archetype_id) {
            return archetype_id;
        }

        let archetype = Archetype::new(&self.types, &self.components, archetype_id, components, chunk_size);
        let index = self.archetypes.len();
        self.archetypes.push(archetype);
        self.archetype_index.insert(archetype_id, index);

        let mut matched = 0;
        for query in &mut self.queries {
            matched += query.try_registrate(index, &self.archetypes[index], &self.types, &self.singletons) as usize;
        }
        for system in &mut self.systems {
            matched += system.query.try_registrate(index, &self.archetypes[index], &self.types, &self.singletons) as usize;
        }
        for (handler_index, handler) in self.handlers.iter_mut().enumerate() {
            if handler.query.try_registrate(index, &self.archetypes[index], &self.types, &self.singletons) {
                matched += 1;
                if !handler.tracked.is_empty() {
                    tracking::try_registrate_track(
                        &mut self.archetypes[index],
                        handler_index,
                        handler.query.name(),
                        &handler.tracked,
                    );
                }
            }
        }

        if self.config.is_verbose() {
            info!(
                "Archetype {archetype_id:#x} created with {} components, matched by {matched} queries",
                self.archetypes[index].components().len()
            );
        }
        archetype_id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries, systems and event handlers
    // ─────────────────────────────────────────────────────────────────────

    /// Compiles a query and matches it against every existing archetype.
    pub fn try_register_query(&mut self, description: QueryDescription) -> EcsResult<QueryId> {
        let mut query = Query::compile(description, &self.types)?;
        for (index, archetype) in self.archetypes.iter().enumerate() {
            query.try_registrate(index, archetype, &self.types, &self.singletons);
        }
        self.log_registration("Query", &query);
        self.queries.push(query);
        Ok(QueryId(self.queries.len() - 1))
    }

    /// Like [`EcsManager::try_register_query`], logging failures.
    pub fn register_query(&mut self, description: QueryDescription) -> Option<QueryId> {
        let name = description.name().to_owned();
        self.try_register_query(description)
            .map_err(|err| error!("register_query `{name}` failed: {err}"))
            .ok()
    }

    /// Registers a system; it runs in registration order until
    /// [`EcsManager::topological_sort`] is called.
    pub fn try_register_system(
        &mut self,
        description: QueryDescription,
        system: impl System + 'static,
    ) -> EcsResult<SystemId> {
        let mut query = Query::compile(description, &self.types)?;
        for (index, archetype) in self.archetypes.iter().enumerate() {
            query.try_registrate(index, archetype, &self.types, &self.singletons);
        }
        self.log_registration("System", &query);
        let index = self.systems.len();
        self.systems.push(RegisteredSystem { query, system: Box::new(system) });
        self.system_order.push(index);
        Ok(SystemId(index))
    }

    /// Like [`EcsManager::try_register_system`], logging failures.
    pub fn register_system(&mut self, description: QueryDescription, system: impl System + 'static) -> Option<SystemId> {
        let name = description.name().to_owned();
        self.try_register_system(description, system)
            .map_err(|err| error!("register_system `{name}` failed: {err}"))
            .ok()
    }

    /// Registers an event handler for its subscribed events.
    ///
    /// ## Errors
    /// Fails if the query does not compile or a tracked component's type is unregistered.

    pub fn try_register_event_handler(
        &mut self,
        description: EventHandlerDescription,
        handler: impl EventHandler + 'static,
    ) -> EcsResult<HandlerId> {
        let (query, events, tracked) = description.into_parts();
        let mut query = Query::compile(query, &self.types)?;
        let tracked = tracked.iter().map(|s| s.resolve(&self.types)).collect::<EcsResult<Vec<_>>>()?;

        let handler_index = self.handlers.len();
        for (index, archetype) in self.archetypes.iter_mut().enumerate() {
            if query.try_registrate(index, archetype, &self.types, &self.singletons) && !tracked.is_empty() {
                tracking::try_registrate_track(archetype, handler_index, query.name(), &tracked);
            }
        }
        for &event in &events {
            self.handler_order.entry(event).or_default().push(handler_index);
        }
        self.log_registration("Event handler", &query);
        self.handlers.push(RegisteredHandler { query, events, tracked, handler: Box::new(handler) });
        Ok(HandlerId(handler_index))
    }

    /// Like [`EcsManager::try_register_event_handler`], logging failures.
    pub fn register_event_handler(
        &mut self,
        description: EventHandlerDescription,
        handler: impl EventHandler + 'static,
    ) -> Option<HandlerId> {
        let name = description.name().to_owned();
        self.try_register_event_handler(description, handler)
            .map_err(|err| error!("register_event_handler `{name}` failed: {err}"))
            .ok()
    }

    fn log_registration(&self, kind: &str, query: &Query) {
        if self.config.is_verbose() {
            info!("{kind} `{}` registered, matching {} archetypes", query.name(), query.cache().len());
        }
    }

    /// Compiled plain query.
    pub fn query(&self, query: QueryId) -> Option<&Query> {
        self.queries.get(query.0)
    }

    /// Names of the systems in execution order.
    pub fn system_order(&self) -> Vec<&str> {
        self.system_order.iter().map(|&i| self.systems[i].query.name()).collect()
    }

    /// Names of the handlers of `event`, in dispatch order.
    pub fn handler_order(&self, event: EventID) -> Vec<&str> {
        self.handler_order
            .get(&event)
            .map(|order| order.iter().map(|&i| self.handlers[i].query.name()).collect())
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scheduling
    // ─────────────────────────────────────────────────────────────────────

    /// Orders systems, and each event's handlers, by their `before`/`after` constraints.
    ///
    /// ## Behavior
    /// - Every cycle is logged with its full path.
    /// - Under [`CyclePolicy::Warn`] cycles are broken and the new order is applied.
    /// - Under [`CyclePolicy::Reject`] the previous order is kept.
    ///
    /// ## Errors
    /// [`EcsError::SchedulingCycle`] under [`CyclePolicy::Reject`] when a cycle exists.

    pub fn topological_sort(&mut self) -> EcsResult<SortReport> {
        let mut report = SortReport::default();

        let nodes: Vec<SortNode<'_>> = self
            .systems
            .iter()
            .map(|s| SortNode { name: s.query.name(), before: s.query.before(), after: s.query.after() })
            .collect();
        let (order, system_report) = topological_sort(&nodes);
        report.cycles.extend(system_report.cycles);
        report.unresolved.extend(system_report.unresolved);

        let mut handler_orders = HashMap::with_capacity(self.handler_order.len());
        for (&event, current) in &self.handler_order {
            let mut members = current.clone();
            members.sort_unstable();
            let nodes: Vec<SortNode<'_>> = members
                .iter()
                .map(|&i| {
                    let query = &self.handlers[i].query;
                    SortNode { name: query.name(), before: query.before(), after: query.after() }
                })
                .collect();
            let (local, event_report) = topological_sort(&nodes);
            report.cycles.extend(event_report.cycles);
            report.unresolved.extend(event_report.unresolved);
            handler_orders.insert(event, local.into_iter().map(|i| members[i]).collect::<Vec<_>>());
        }

        if report.has_cycles() && self.config.cycle_policy == CyclePolicy::Reject {
            error!("Scheduling rejected: {} dependency cycles, the previous order is kept", report.cycles.len());
            return Err(EcsError::SchedulingCycle(report.cycles));
        }

        self.system_order = order;
        self.handler_order = handler_orders;
        if self.config.is_verbose() {
            info!("Systems scheduled: {}", self.system_order().join(", "));
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entity lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Creates one entity from `template`, writing its storage immediately.
    ///
    /// ## Behavior
    /// - Per component, `init` wins over the template default; unknown or
    ///   mismatching initializers are logged and dropped.
    /// - [`OnAppear`] is sent to the new entity once its storage is written.
    ///
    /// ## Errors
    /// - [`EcsError::UnknownTemplate`]
    /// - [`EcsError::Capacity`]

    pub fn try_create_entity(&mut self, template: TemplateID, init: InitializerList) -> EcsResult<EntityId> {
        self.templates.require(template)?;
        let entity = self.entities.allocate(EntityState::Alive)?;
        if let Err(err) = self.materialize(entity, template, init) {
            self.entities.destroy(entity);
            return Err(err);
        }
        self.send_event_immediate_to(entity, &OnAppear);
        Ok(entity)
    }

    /// Like [`EcsManager::try_create_entity`], logging failures and returning [`EntityId::INVALID`].
    pub fn create_entity(&mut self, template: TemplateID, init: InitializerList) -> EntityId {
        self.try_create_entity(template, init).unwrap_or_else(|err| {
            error!("create_entity failed: {err}");
            EntityId::INVALID
        })
    }

    /// Creates `count` entities from `template` in one batch.
    ///
    /// When `init` is non-empty, `count` is clamped to its shortest column.

    pub fn try_create_entities(
        &mut self,
        template: TemplateID,
        count: usize,
        init: InitializerSoaList,
    ) -> EcsResult<Vec<EntityId>> {
        self.templates.require(template)?;
        let count = batch_count(template, count, &init);
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            match self.entities.allocate(EntityState::Alive) {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    for entity in entities {
                        self.entities.destroy(entity);
                    }
                    return Err(err.into());
                }
            }
        }
        if let Err(err) = self.materialize_batch(&entities, template, init) {
            for &entity in &entities {
                self.entities.destroy(entity);
            }
            return Err(err);
        }
        for &entity in &entities {
            self.send_event_immediate_to(entity, &OnAppear);
        }
        Ok(entities)
    }

    /// Like [`EcsManager::try_create_entities`], logging failures and returning no handles.
    pub fn create_entities(&mut self, template: TemplateID, count: usize, init: InitializerSoaList) -> Vec<EntityId> {
        self.try_create_entities(template, count, init).unwrap_or_else(|err| {
            error!("create_entities failed: {err}");
            Vec::new()
        })
    }

    /// Writes one row for `entity` and records its location.
    fn materialize(&mut self, entity: EntityId, template_id: TemplateID, init: InitializerList) -> EcsResult<()> {
        let template = self.templates.require(template_id)?;
        let archetype_id = template.archetype_id();
        let index = *self.archetype_index.get(&archetype_id).ok_or(EcsError::UnknownArchetype(archetype_id))?;

        let mut overrides = resolve_overrides(init, &self.types, &self.components, template);
        overrides.insert(ENTITY_ID_COMPONENT, ComponentValue::new(entity));
        let row = self.archetypes[index].add_entity(template.defaults(), &mut overrides);

        if !self.entities.mutate(entity, archetype_id, row) {
            // Destroyed while the creation was pending.
            self.remove_row(index, row);
            return Err(EcsError::StaleEntity(entity));
        }
        Ok(())
    }

    /// Writes one row per entity; rows of entities destroyed meanwhile are removed again.
    fn materialize_batch(&mut self, entities: &[EntityId], template_id: TemplateID, init: InitializerSoaList) -> EcsResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let template = self.templates.require(template_id)?;
        let archetype_id = template.archetype_id();
        let index = *self.archetype_index.get(&archetype_id).ok_or(EcsError::UnknownArchetype(archetype_id))?;

        let mut overrides = resolve_soa_overrides(init, &self.types, &self.components, template);
        overrides.insert(ENTITY_ID_COMPONENT, ComponentVec::new(entities.to_vec()));
        let first = self.archetypes[index].add_entities(template.defaults(), overrides, entities.len() as u32);

        let mut stale_rows = Vec::new();
        for (offset, &entity) in entities.iter().enumerate() {
            let row = first + offset as RowID;
            if !self.entities.mutate(entity, archetype_id, row) {
                stale_rows.push(row);
            }
        }
        for &row in stale_rows.iter().rev() {
            self.remove_row(index, row);
        }
        Ok(())
    }

    /// Removes `row` and records the new row of the entity swapped into it.
    fn remove_row(&mut self, archetype_index: usize, row: RowID) {
        let archetype = &mut self.archetypes[archetype_index];
        if archetype.remove_entity(row).is_some() {
            if let Some(&moved) = archetype.get_component::<EntityId>(ENTITY_ID_COMPONENT, row) {
                self.entities.relocate(moved, row);
            }
        }
    }

    /// Destroys `entity` immediately.
    ///
    /// ## Behavior
    /// - [`OnDisappear`] is sent to the entity before its storage is removed.
    /// - The last row of the archetype moves into the freed row.
    /// - An entity still waiting for its deferred creation is dropped and its
    ///   creation skipped.
    ///
    /// ## Errors
    /// [`EcsError::StaleEntity`] for stale or dead handles.

    pub fn try_destroy_entity(&mut self, entity: EntityId) -> EcsResult<()> {
        match self.entities.state(entity) {
            EntityState::AsyncCreation => {
                self.entities.mark_as_destroyed(entity);
                return Ok(());
            }
            EntityState::Dead => return Err(EcsError::StaleEntity(entity)),
            EntityState::Alive | EntityState::AsyncDestroy => {}
        }
        self.send_event_immediate_to(entity, &OnDisappear);
        let (archetype_id, row) = self.entities.get(entity).ok_or(EcsError::StaleEntity(entity))?;
        let index = *self.archetype_index.get(&archetype_id).ok_or(EcsError::UnknownArchetype(archetype_id))?;
        self.remove_row(index, row);
        self.entities.destroy(entity);
        Ok(())
    }

    /// Like [`EcsManager::try_destroy_entity`], logging failures.
    pub fn destroy_entity(&mut self, entity: EntityId) -> bool {
        self.try_destroy_entity(entity)
            .map_err(|err| error!("destroy_entity failed: {err}"))
            .is_ok()
    }

    /// Deferred surface, as handed to callbacks.
    pub fn commands(&mut self) -> Commands<'_> {
        Commands::new(&mut self.entities, &mut self.deferred, &self.templates)
    }

    /// Queues one creation; see [`Commands::create_entity`].
    pub fn create_entity_deferred(&mut self, template: TemplateID, init: InitializerList) -> EntityId {
        self.commands().create_entity(template, init)
    }

    /// Queues a batch creation; see [`Commands::create_entities`].
    pub fn create_entities_deferred(&mut self, template: TemplateID, count: usize, init: InitializerSoaList) -> Vec<EntityId> {
        self.commands().create_entities(template, count, init)
    }

    /// Queues one destruction; see [`Commands::destroy_entity`].
    pub fn destroy_entity_deferred(&mut self, entity: EntityId) -> bool {
        self.commands().destroy_entity(entity)
    }

    /// Applies queued destructions, then queued creations.
    ///
    /// ## Behavior
    /// - Destructions run first, in queue order, each preceded by [`OnDisappear`].
    /// - Creations run next, in queue order, each followed by [`OnAppear`];
    ///   creations whose handle was destroyed in the meantime are skipped.
    /// - Operations queued by handlers during the flush wait for the next flush.

    pub fn flush_entities(&mut self) {
        if !self.deferred.has_entity_work() {
            return;
        }
        let destructions = mem::take(&mut self.deferred.destructions);
        let creations = mem::take(&mut self.deferred.creations);
        let (mut destroyed, mut created) = (0usize, 0usize);

        for entity in destructions {
            if self.entities.state(entity) != EntityState::AsyncDestroy {
                debug!("Deferred destruction of {entity} skipped, the entity is already gone");
                continue;
            }
            match self.try_destroy_entity(entity) {
                Ok(()) => destroyed += 1,
                Err(err) => error!("Deferred destruction failed: {err}"),
            }
        }

        for creation in creations {
            match creation {
                DeferredCreation::Single { entity, template, init } => {
                    if self.entities.state(entity) != EntityState::AsyncCreation {
                        debug!("Deferred creation of {entity} skipped, the handle was destroyed");
                        continue;
                    }
                    match self.materialize(entity, template, init) {
                        Ok(()) => {
                            created += 1;
                            self.send_event_immediate_to(entity, &OnAppear);
                        }
                        Err(err) => {
                            error!("Deferred creation failed: {err}");
                            self.entities.destroy(entity);
                        }
                    }
                }
                DeferredCreation::Batch { entities, template, init } => {
                    if let Err(err) = self.materialize_batch(&entities, template, init) {
                        error!("Deferred batch creation failed: {err}");
                        for &entity in &entities {
                            self.entities.destroy(entity);
                        }
                        continue;
                    }
                    for entity in entities {
                        if self.entities.state(entity) == EntityState::Alive {
                            created += 1;
                            self.send_event_immediate_to(entity, &OnAppear);
                        }
                    }
                }
            }
        }

        if self.config.is_verbose() {
            info!("Flushed entities: {destroyed} destroyed, {created} created");
        }
    }

    /// Dispatches queued events in queue order.
    pub fn flush_events(&mut self) {
        let events = mem::take(&mut self.deferred.events);
        let count = events.len();
        for queued in events {
            let event = queued.as_event();
            match queued.target {
                Some(target) => {
                    self.dispatch_to_entity(target, &event);
                }
                None => self.dispatch_broadcast(&event),
            }
        }
        if self.config.is_verbose() && count > 0 {
            info!("Flushed {count} events");
        }
    }

    /// Flushes entities, then events.
    pub fn flush(&mut self) {
        self.flush_entities();
        self.flush_events();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    /// Dispatches `event` to every matching entity of every subscribed handler now.
    pub fn send_event_immediate<E: EventType>(&mut self, event: &E) {
        self.dispatch_broadcast(&Event::new(event));
    }

    /// Dispatches `event` to `target` now; returns `false` if the handle is not accessible.
    pub fn send_event_immediate_to<E: EventType>(&mut self, target: EntityId, event: &E) -> bool {
        self.dispatch_to_entity(target, &Event::new(event))
    }

    /// Queues `event` for every matching entity until the next [`EcsManager::flush_events`].
    pub fn send_event<E: EventType>(&mut self, event: E) {
        self.commands().send_event(event);
    }

    /// Queues `event` for `target` until the next [`EcsManager::flush_events`].
    pub fn send_event_to<E: EventType>(&mut self, target: EntityId, event: E) {
        self.commands().send_event_to(target, event);
    }

    fn dispatch_broadcast(&mut self, event: &Event<'_>) {
        let Some(order) = self.handler_order.get(&event.id()).cloned() else {
            return;
        };
        for handler in order {
            self.run_broadcast(handler, event);
        }
    }

    fn dispatch_to_entity(&mut self, target: EntityId, event: &Event<'_>) -> bool {
        let Some((archetype_id, row)) = self.entities.get(target) else {
            warn!("Event `{}` ({:#x}) dropped, target {target:?} is stale or dead", event.name(), event.id());
            return false;
        };
        let Some(&index) = self.archetype_index.get(&archetype_id) else {
            warn!("Event `{}` ({:#x}) dropped, archetype {archetype_id:#x} of {target:?} not found", event.name(), event.id());
            return false;
        };
        if let Some(order) = self.handler_order.get(&event.id()).cloned() {
            for handler in order {
                self.run_unicast(handler, index, row, event);
            }
        }
        true
    }

    fn run_broadcast(&mut self, handler_index: usize, event: &Event<'_>) {
        let Self { archetypes, handlers, entities, deferred, templates, singletons, .. } = self;
        let RegisteredHandler { query, handler, .. } = &mut handlers[handler_index];
        for entry in query.cache() {
            let archetype = &archetypes[entry.archetype_index];
            if archetype.is_empty() {
                continue;
            }
            let mut commands = Commands::new(entities, deferred, templates);
            for_each_chunk(archetype, singletons, query.signature(), entry, |view| {
                handler.broadcast(view, event, &mut commands)
            });
            if !entry.tracked.is_empty() {
                archetypes[entry.archetype_index].mark_tracked_dirty(&entry.tracked, None);
            }
        }
    }

    fn run_unicast(&mut self, handler_index: usize, archetype_index: usize, row: RowID, event: &Event<'_>) {
        let Self { archetypes, handlers, entities, deferred, templates, singletons, .. } = self;
        let RegisteredHandler { query, handler, .. } = &mut handlers[handler_index];
        let Some(entry) = query.entry_for(archetypes[archetype_index].archetype_id()) else {
            return;
        };
        let mut commands = Commands::new(entities, deferred, templates);
        for_row(&archetypes[archetype_index], singletons, query.signature(), entry, row, |view| {
            handler.unicast(view, event, &mut commands)
        });
        if !entry.tracked.is_empty() {
            archetypes[archetype_index].mark_tracked_dirty(&entry.tracked, Some(row));
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Systems, queries and tracking
    // ─────────────────────────────────────────────────────────────────────

    /// Runs every system once, in scheduled order, over every matched chunk.
    pub fn update_systems(&mut self) {
        for position in 0..self.system_order.len() {
            let system_index = self.system_order[position];
            self.run_system(system_index);
        }
    }

    fn run_system(&mut self, system_index: usize) {
        let Self { archetypes, systems, entities, deferred, templates, singletons, .. } = self;
        let RegisteredSystem { query, system } = &mut systems[system_index];
        for entry in query.cache() {
            let archetype = &archetypes[entry.archetype_index];
            if archetype.is_empty() {
                continue;
            }
            let mut commands = Commands::new(entities, deferred, templates);
            for_each_chunk(archetype, singletons, query.signature(), entry, |view| system.update(view, &mut commands));
            if !entry.tracked.is_empty() {
                archetypes[entry.archetype_index].mark_tracked_dirty(&entry.tracked, None);
            }
        }
    }

    /// Runs `f` over every chunk matched by a plain query.
    pub fn query_for_each(&mut self, id: QueryId, mut f: impl FnMut(&ChunkView<'_>)) {
        let Self { archetypes, queries, singletons, .. } = self;
        let Some(query) = queries.get(id.0) else {
            error!("Query {} is not registered", id.0);
            return;
        };
        for entry in query.cache() {
            let archetype = &archetypes[entry.archetype_index];
            if archetype.is_empty() {
                continue;
            }
            for_each_chunk(archetype, singletons, query.signature(), entry, &mut f);
            if !entry.tracked.is_empty() {
                archetypes[entry.archetype_index].mark_tracked_dirty(&entry.tracked, None);
            }
        }
    }

    /// Runs `f` once for `entity` if the query matches its archetype.
    ///
    /// Returns `false` if the handle is not accessible or the query does not match.

    pub fn query_for_entity(&mut self, id: QueryId, entity: EntityId, f: impl FnOnce(&ChunkView<'_>)) -> bool {
        let Self { archetypes, archetype_index, queries, singletons, entities, .. } = self;
        let Some(query) = queries.get(id.0) else {
            error!("Query {} is not registered", id.0);
            return false;
        };
        let Some((archetype_id, row)) = entities.get(entity) else {
            return false;
        };
        let (Some(&index), Some(entry)) = (archetype_index.get(&archetype_id), query.entry_for(archetype_id)) else {
            return false;
        };
        for_row(&archetypes[index], singletons, query.signature(), entry, row, f);
        if !entry.tracked.is_empty() {
            archetypes[index].mark_tracked_dirty(&entry.tracked, Some(row));
        }
        true
    }

    /// Compares every dirty tracked column and sends [`OnTrack`] for changed rows.
    ///
    /// ## Behavior
    /// For every row with a non-zero change mask, each subscription whose mask
    /// intersects it receives one unicast [`OnTrack`] carrying the intersection.
    ///
    /// Returns the number of notifications sent.

    pub fn track_changes(&mut self) -> usize {
        let mut sent = 0;
        for index in 0..self.archetypes.len() {
            let changes = tracking::compute_changes(&mut self.archetypes[index], self.config.parallel_tracking_min_rows);
            if changes.is_empty() {
                continue;
            }
            let subscriptions = self.archetypes[index].tracked_events().to_vec();
            for (row, mask) in changes {
                for subscription in &subscriptions {
                    let hit = mask & subscription.mask;
                    if hit == 0 {
                        continue;
                    }
                    let payload = OnTrack { mask: hit };
                    self.run_unicast(subscription.handler, index, row, &Event::new(&payload));
                    sent += 1;
                }
            }
        }
        if self.config.is_verbose() && sent > 0 {
            info!("Tracking pass sent {sent} change notifications");
        }
        sent
    }

    // ─────────────────────────────────────────────────────────────────────
    // Component access
    // ─────────────────────────────────────────────────────────────────────

    fn locate<T: 'static>(&self, entity: EntityId, name: &str) -> EcsResult<(usize, ComponentID, RowID)> {
        let type_id = self.types.type_id_of::<T>().ok_or(EcsError::UnregisteredType(type_name::<T>()))?;
        let component_id = component_id_of(type_id, name);
        let (archetype_id, row) = self.entities.get(entity).ok_or(EcsError::StaleEntity(entity))?;
        let index = *self.archetype_index.get(&archetype_id).ok_or(EcsError::UnknownArchetype(archetype_id))?;
        if !self.archetypes[index].has_component(component_id) {
            return Err(EcsError::UnknownComponent(name.to_owned()));
        }
        Ok((index, component_id, row))
    }

    /// Borrows component `name` of `entity`.
    pub fn try_get_component<T: 'static>(&self, entity: EntityId, name: &str) -> EcsResult<&T> {
        let (index, component_id, row) = self.locate::<T>(entity, name)?;
        self.archetypes[index]
            .get_component::<T>(component_id, row)
            .ok_or(EcsError::UnknownComponent(name.to_owned()))
    }

    /// Like [`EcsManager::try_get_component`], logging failures.
    pub fn get_component<T: 'static>(&self, entity: EntityId, name: &str) -> Option<&T> {
        self.try_get_component(entity, name)
            .map_err(|err| error!("get_component `{name}` failed: {err}"))
            .ok()
    }

    /// Mutably borrows component `name` of `entity`, marking it dirty if tracked.
    ///
    /// ## Errors
    /// [`EcsError::ReadOnlyComponent`] for the `eid` component.

    pub fn try_get_component_mut<T: 'static>(&mut self, entity: EntityId, name: &str) -> EcsResult<&mut T> {
        let (index, component_id, row) = self.locate::<T>(entity, name)?;
        if component_id == ENTITY_ID_COMPONENT {
            return Err(EcsError::ReadOnlyComponent(name.to_owned()));
        }
        self.archetypes[index]
            .get_component_mut::<T>(component_id, row)
            .ok_or(EcsError::UnknownComponent(name.to_owned()))
    }

    /// Like [`EcsManager::try_get_component_mut`], logging failures.
    pub fn get_component_mut<T: 'static>(&mut self, entity: EntityId, name: &str) -> Option<&mut T> {
        self.try_get_component_mut(entity, name)
            .map_err(|err| error!("get_component_mut `{name}` failed: {err}"))
            .ok()
    }

    /// Overwrites component `name` of `entity`; returns `false` on failure.
    pub fn set_component<T: 'static>(&mut self, entity: EntityId, name: &str, value: T) -> bool {
        match self.get_component_mut::<T>(entity, name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// The singleton instance of `T`.
    pub fn singleton<T: 'static>(&self) -> Option<&T> {
        self.singletons.value::<T>(self.types.type_id_of::<T>()?)
    }

    /// Mutable access to the singleton instance of `T`.
    pub fn singleton_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let type_id = self.types.type_id_of::<T>()?;
        self.singletons.value_mut::<T>(type_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entity predicates
    // ─────────────────────────────────────────────────────────────────────

    /// Returns `true` if `entity` exists and is not scheduled for removal.
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns `true` if `entity`'s storage can be read.
    #[inline]
    pub fn can_access(&self, entity: EntityId) -> bool {
        self.entities.can_access(entity)
    }

    /// Lifecycle state of `entity`.
    #[inline]
    pub fn entity_state(&self, entity: EntityId) -> EntityState {
        self.entities.state(entity)
    }

    /// `(archetype, row)` of an accessible entity.
    #[inline]
    pub fn entity_location(&self, entity: EntityId) -> Option<(ArchetypeID, RowID)> {
        self.entities.get(entity)
    }

    /// Number of entities that are not dead, including pending creations.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl Default for EcsManager {
    fn default() -> Self {
        Self::new(EcsConfig::default())
    }
}

impl Drop for EcsManager {
    fn drop(&mut self) {
        if self.config.is_verbose() {
            let rows: u64 = self.archetypes.iter().map(|a| a.entity_count() as u64).sum();
            info!("Manager dropped: {rows} rows in {} archetypes destroyed", self.archetypes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::systems::FnSystem;

    #[test]
    fn construction_registers_the_eid_component() {
        let ecs = EcsManager::default();
        assert_eq!(ecs.component_id::<EntityId>(ENTITY_ID_COMPONENT_NAME), Some(ENTITY_ID_COMPONENT));
    }

    #[test]
    fn plugins_run_in_order() {
        let types = |ecs: &mut EcsManager| {
            ecs.register_type(TypeDeclaration::of::<u32>("u32"));
        };
        let templates = |ecs: &mut EcsManager| {
            ecs.register_template(TemplateDescription::new("counter").with("count", 0u32));
        };
        let plugins: [&dyn Plugin; 2] = [&types, &templates];
        let ecs = EcsManager::with_plugins(EcsConfig::default(), plugins);
        assert!(ecs.template_by_name("counter").is_some());
        assert!(ecs.component_id::<u32>("count").is_some());
    }

    #[test]
    fn systems_see_entities_created_by_templates() {
        let mut ecs = EcsManager::default();
        ecs.register_type(TypeDeclaration::of::<u32>("u32"));
        let template = ecs.register_template(TemplateDescription::new("counter").with("count", 1u32));
        let system = QueryDescription::new("increment").write::<u32>("count");
        ecs.register_system(
            system,
            FnSystem::new(|view, _| {
                let mut count = view.write::<u32>(0);
                for row in 0..view.len() {
                    if let Some(c) = count.get_mut(row) {
                        *c += 1;
                    }
                }
            }),
        );
        let entity = ecs.create_entity(template, InitializerList::new().with("count", 10u32));
        ecs.update_systems();
        assert_eq!(ecs.get_component::<u32>(entity, "count"), Some(&11));
        assert!(ecs.try_get_component_mut::<EntityId>(entity, ENTITY_ID_COMPONENT_NAME).is_err());
        assert_eq!(ecs.get_component::<EntityId>(entity, ENTITY_ID_COMPONENT_NAME), Some(&entity));
    }
}
