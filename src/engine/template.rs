//! # Templates
//!
//! A template is a named, inheritable set of component defaults. Every
//! template resolves to exactly one archetype; creating an entity from a
//! template writes the template's defaults (and any per-entity overrides)
//! into that archetype.
//!
//! ## Inheritance
//!
//! Templates may list any number of parents by name. Composition is flattened
//! once, at registration:
//!
//! - components declared by the child win,
//! - components missing from the child are copied from the parents, earlier
//!   parents taking precedence over later ones,
//! - tracked flags are inherited,
//! - unknown parents are logged and skipped.
//!
//! ```ignore
//! let brick = ecs.register_template(
//!     TemplateDescription::new("brick").with("health", 10i32).with("name", String::from("brick")),
//! );
//! let strong = ecs.register_template(
//!     TemplateDescription::new("strong_brick").parent("brick").with("health", 100i32),
//! );
//! // strong_brick resolves to { health: 100, name: "brick" }
//! ```
//!
//! Every template also carries the `eid` component, which records the
//! entity's own handle.

use std::collections::{BTreeSet, HashMap};

use log::{error, warn};

use crate::engine::component::{component_id_of, ComponentRegistry};
use crate::engine::entity::{EntityId, ENTITY_ID_COMPONENT};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::hash::fnv_hash_str;
use crate::engine::type_registry::TypeRegistry;
use crate::engine::types::{type_id_of_component, ArchetypeChunkSize, ArchetypeID, ComponentID, TemplateID};
use crate::engine::value::{ComponentKey, ComponentMap, ComponentValue};

/// Resolves an initializer key against the type of the value it carries.
///
/// ## Behavior
/// - A name key resolves to the component of that name whose type is the
///   value's registered type.
/// - An id key must name a registered component whose type is the value's type.
///
/// ## Errors
/// - [`EcsError::UnregisteredType`] if the value's type was never registered.
/// - [`EcsError::UnknownComponent`] for an unregistered component id.
/// - [`EcsError::TypeMismatch`] if the id key's type differs from the value's.

pub fn resolve_component_key(
    key: &ComponentKey,
    value_type: std::any::TypeId,
    value_type_name: &'static str,
    types: &TypeRegistry,
    components: &ComponentRegistry,
) -> EcsResult<ComponentID> {
    match key {
        ComponentKey::Name(name) => types
            .type_id_of_rust(value_type)
            .map(|type_id| component_id_of(type_id, name))
            .ok_or(EcsError::UnregisteredType(value_type_name)),
        ComponentKey::Id(component_id) => {
            let declaration = components
                .get(*component_id)
                .ok_or_else(|| EcsError::UnknownComponent(format!("{component_id:#x}")))?;
            let expected = types.require(declaration.type_id)?;
            if expected.rust_type() != value_type {
                return Err(EcsError::TypeMismatch {
                    component: declaration.name.clone(),
                    expected: expected.type_name().to_owned(),
                    found: value_type_name.to_owned(),
                });
            }
            Ok(*component_id)
        }
    }
}

/// Declarative description of a template.
#[derive(Debug, Default)]
pub struct TemplateDescription {
    name: String,
    parents: Vec<String>,
    components: Vec<(ComponentKey, ComponentValue, bool)>,
    chunk_size: Option<ArchetypeChunkSize>,
}

impl TemplateDescription {
    /// Starts an empty description named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Inherits every component of the template named `name`.
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parents.push(name.into());
        self
    }

    /// Declares a component with its default value.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, key: impl Into<ComponentKey>, value: T) -> Self {
        self.components.push((key.into(), ComponentValue::new(value), false));
        self
    }

    /// Declares a change-tracked component with its default value.
    pub fn tracked<T: Clone + Send + Sync + 'static>(mut self, key: impl Into<ComponentKey>, value: T) -> Self {
        self.components.push((key.into(), ComponentValue::new(value), true));
        self
    }

    /// Chunk size of the archetype, if this template creates it.
    pub fn chunk_size(mut self, chunk_size: ArchetypeChunkSize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Template name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A registered, flattened template.
#[derive(Debug)]
pub struct Template {
    name: String,
    template_id: TemplateID,
    archetype_id: ArchetypeID,
    parents: Vec<TemplateID>,
    components: Vec<(ComponentID, bool)>,
    defaults: ComponentMap,
    chunk_size: ArchetypeChunkSize,
}

impl Template {
    /// Template name.
    #[inline] pub fn name(&self) -> &str { &self.name }
    /// Template id, the hash of the name.
    #[inline] pub fn template_id(&self) -> TemplateID { self.template_id }
    /// Archetype every entity of this template lives in.
    #[inline] pub fn archetype_id(&self) -> ArchetypeID { self.archetype_id }
    /// Resolved parents.
    #[inline] pub fn parents(&self) -> &[TemplateID] { &self.parents }
    /// Sorted `(component, tracked)` set.
    #[inline] pub fn components(&self) -> &[(ComponentID, bool)] { &self.components }
    /// Default value of every component.
    #[inline] pub fn defaults(&self) -> &ComponentMap { &self.defaults }
    /// Chunk size requested for the archetype.
    #[inline] pub fn chunk_size(&self) -> ArchetypeChunkSize { self.chunk_size }

    /// Returns `true` if the template declares the component.
    pub fn has_component(&self, component_id: ComponentID) -> bool {
        self.defaults.contains_key(&component_id)
    }

    /// Returns `true` if the template tracks the component.
    pub fn is_tracked(&self, component_id: ComponentID) -> bool {
        self.components.iter().any(|&(c, tracked)| c == component_id && tracked)
    }

    /// Default value of a component, if it is a `T`.
    pub fn default_value<T: 'static>(&self, component_id: ComponentID) -> Option<&T> {
        self.defaults.get(&component_id)?.downcast_ref::<T>()
    }
}

/// Flattened template data, before its archetype is known.
pub(crate) struct FlatTemplate {
    pub(crate) name: String,
    pub(crate) template_id: TemplateID,
    pub(crate) parents: Vec<TemplateID>,
    pub(crate) components: Vec<(ComponentID, bool)>,
    pub(crate) defaults: ComponentMap,
    pub(crate) chunk_size: ArchetypeChunkSize,
}

impl FlatTemplate {
    pub(crate) fn into_template(self, archetype_id: ArchetypeID) -> Template {
        Template {
            name: self.name,
            template_id: self.template_id,
            archetype_id,
            parents: self.parents,
            components: self.components,
            defaults: self.defaults,
            chunk_size: self.chunk_size,
        }
    }
}

/// Every registered template.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateID, Template>,
    order: Vec<TemplateID>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a template with this id exists.
    #[inline]
    pub fn contains(&self, template_id: TemplateID) -> bool {
        self.templates.contains_key(&template_id)
    }

    /// Looks a template up by id.
    #[inline]
    pub fn get(&self, template_id: TemplateID) -> Option<&Template> {
        self.templates.get(&template_id)
    }

    /// Looks a template up by id, failing with [`EcsError::UnknownTemplate`].
    pub fn require(&self, template_id: TemplateID) -> EcsResult<&Template> {
        self.get(template_id).ok_or(EcsError::UnknownTemplate(template_id))
    }

    /// Looks a template up by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Template> {
        self.get(fnv_hash_str(name))
    }

    /// Templates in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.order.iter().filter_map(|id| self.templates.get(id))
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no template is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Flattens `description` against its parents.
    ///
    /// ## Behavior
    /// - Components with an unregistered value type, an unknown id or a
    ///   mismatching value are logged and dropped. Named components are
    ///   declared in `components` on first use.
    /// - The `eid` component is added with an invalid handle as default.
    /// - Without an explicit chunk size the first parent's, or else
    ///   `default_chunk_size`, is used.

    pub(crate) fn flatten(
        &self,
        description: TemplateDescription,
        types: &TypeRegistry,
        components: &mut ComponentRegistry,
        default_chunk_size: ArchetypeChunkSize,
    ) -> FlatTemplate {
        let TemplateDescription { name, parents, components: declared, chunk_size } = description;

        let mut defaults = ComponentMap::new();
        let mut tracked = BTreeSet::new();
        for (key, value, is_tracked) in declared {
            let resolved = resolve_component_key(&key, value.rust_type(), value.type_name(), types, components)
                .and_then(|component_id| match key {
                    ComponentKey::Name(ref component_name) => {
                        components.get_or_add(type_id_of_component(component_id), component_name)
                    }
                    ComponentKey::Id(_) => Ok(component_id),
                });
            match resolved {
                Ok(component_id) => {
                    if defaults.insert(component_id, value).is_some() {
                        warn!("Template `{name}` declares component `{}` twice, the last value wins", components.name_of(component_id));
                    }
                    if is_tracked {
                        tracked.insert(component_id);
                    }
                }
                Err(err) => error!("Template `{name}`: {err}, the component is dropped"),
            }
        }

        let mut parent_ids = Vec::with_capacity(parents.len());
        let mut inherited_chunk_size = None;
        for parent_name in &parents {
            let Some(parent) = self.get_by_name(parent_name) else {
                error!("Template `{name}` inherits from unknown template `{parent_name}`, the parent is skipped");
                continue;
            };
            parent_ids.push(parent.template_id());
            inherited_chunk_size.get_or_insert(parent.chunk_size());
            for (component_id, value) in parent.defaults() {
                defaults.entry(*component_id).or_insert_with(|| value.clone());
            }
            tracked.extend(parent.components().iter().filter(|(_, t)| *t).map(|(c, _)| *c));
        }

        defaults
            .entry(ENTITY_ID_COMPONENT)
            .or_insert_with(|| ComponentValue::new(EntityId::INVALID));

        let mut component_set: Vec<(ComponentID, bool)> =
            defaults.keys().map(|&c| (c, tracked.contains(&c))).collect();
        component_set.sort_unstable_by_key(|(c, _)| *c);

        FlatTemplate {
            template_id: fnv_hash_str(&name),
            name,
            parents: parent_ids,
            components: component_set,
            defaults,
            chunk_size: chunk_size.or(inherited_chunk_size).unwrap_or(default_chunk_size),
        }
    }

    pub(crate) fn insert(&mut self, template: Template) {
        let template_id = template.template_id();
        if self.templates.insert(template_id, template).is_none() {
            self.order.push(template_id);
        }
    }
}
