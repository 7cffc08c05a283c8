//! `World`: the aggregate root that owns entities, archetypes, resources, the command buffer and
//! event channels (spec 4, "World").
//!
//! Grounded on `examples/0x112233-legion/src/lib.rs`'s `World` (owns a `BlockAllocator`-backed
//! entity manager, an archetype `Vec`, and a component source registry) and on
//! `examples/0x112233-legion/src/resource.rs` for resource storage; re-targeted from legion's
//! static-type component storage to this crate's dynamic `typeId`-indexed archetype model.
use std::any::{Any, TypeId};

use fxhash::FxHashMap;

use crate::archetype::{ArchetypeId, ArchetypeIndex};
use crate::column::{ArrayColumn, TypedColumn};
use crate::command::CommandBuffer;
use crate::entity::{Entity, EntityAllocator};
use crate::error::{EcsError, EcsResult};
use crate::event::{ComponentEvent, EventChannel};
use crate::registry::{ComponentRegistry, ComponentTypeId, Schema};
use crate::resource::{Read, Resources, Write};
use crate::value::{ComponentValues, DynComponent};

/// A deterministic, data-oriented simulation world (spec 4). Construct via `Universe::new_world`
/// or `World::new` directly; single-world-per-process is the common case, so registries and the
/// entity allocator live here rather than behind a shared process-wide handle (see DESIGN.md).
pub struct World {
    frame: u32,
    entities: EntityAllocator,
    registry: ComponentRegistry,
    archetypes: ArchetypeIndex,
    location: FxHashMap<Entity, ArchetypeId>,
    enabled: FxHashMap<Entity, bool>,
    resources: Resources,
    command_buffer: CommandBuffer,
    component_events: EventChannel<ComponentEvent>,
    event_channels: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        World {
            frame: 0,
            entities: EntityAllocator::new(),
            registry: ComponentRegistry::new(),
            archetypes: ArchetypeIndex::new(),
            location: FxHashMap::default(),
            enabled: FxHashMap::default(),
            resources: Resources::new(),
            command_buffer: CommandBuffer::new(),
            component_events: EventChannel::new(),
            event_channels: FxHashMap::default(),
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Advances the frame counter. Does not flush the command buffer; call `flush` explicitly
    /// (the parallel runner does this between waves and at tick boundaries).
    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    // -- component registration ------------------------------------------------------------

    pub fn register_component<T: 'static>(&mut self, name: &'static str) -> EcsResult<ComponentTypeId> {
        self.registry.register::<T>(name)
    }

    pub fn register_component_with_schema<T: 'static>(
        &mut self,
        name: &'static str,
        schema: Schema,
    ) -> EcsResult<ComponentTypeId> {
        self.registry.register_with_schema::<T>(name, Some(schema))
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // -- entities ---------------------------------------------------------------------------

    /// Reserves a handle immediately and queues its placement into the empty archetype; the
    /// handle is usable as a command-buffer target right away even though the archetype
    /// placement itself is deferred to the next `flush` (spec 4.6).
    pub fn create_entity(&mut self, enabled: bool) -> Entity {
        let entity = self.entities.create();
        self.command_buffer.create(entity, enabled);
        entity
    }

    pub fn destroy_entity(&mut self, entity: Entity) {
        self.command_buffer.destroy(entity);
    }

    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) {
        self.command_buffer.set_enabled(entity, enabled);
    }

    pub fn is_enabled(&self, entity: Entity) -> bool {
        self.enabled.get(&entity).copied().unwrap_or(false)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn add_component(&mut self, entity: Entity, type_id: ComponentTypeId, data: ComponentValues) {
        self.command_buffer.add_by_type_id(entity, type_id, data);
    }

    pub fn add_dyn_component(&mut self, entity: Entity, type_id: ComponentTypeId, value: Box<dyn DynComponent>) {
        self.command_buffer.add_dyn_by_type_id(entity, type_id, value);
    }

    pub fn remove_component(&mut self, entity: Entity, type_id: ComponentTypeId) {
        self.command_buffer.remove_by_type_id(entity, type_id);
    }

    pub fn has_component(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.archetype_of(entity).is_some_and(|a| a.has_type(type_id))
    }

    /// An owned snapshot of `entity`'s component, never a live alias (spec 4.4).
    pub fn get_component(&self, entity: Entity, type_id: ComponentTypeId) -> Option<ComponentValues> {
        self.archetype_of(entity)?.component_snapshot(entity, type_id)
    }

    pub fn archetype_of(&self, entity: Entity) -> Option<&crate::archetype::Archetype> {
        let archetype_id = *self.location.get(&entity)?;
        self.archetypes.get(archetype_id)
    }

    // -- resources ----------------------------------------------------------------------------

    pub fn insert_resource<T: 'static + Send + Sync>(&mut self, value: T) {
        self.resources.insert(value);
    }

    pub fn resource<T: 'static + Send + Sync>(&self) -> Option<Read<'_, T>> {
        self.resources.get::<T>()
    }

    pub fn resource_mut<T: 'static + Send + Sync>(&self) -> Option<Write<'_, T>> {
        self.resources.get_mut::<T>()
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    // -- events -------------------------------------------------------------------------------

    pub fn component_events(&self) -> &EventChannel<ComponentEvent> {
        &self.component_events
    }

    /// Looks up (creating on first use) the typed event channel for `T`. Channels are resources
    /// in spirit (spec 4, "Channels are resources"): process-lifetime, one per type.
    pub fn event_channel<T: 'static + Send + Sync>(&mut self) -> &EventChannel<T> {
        self.event_channels
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(EventChannel::<T>::new()))
            .downcast_ref::<EventChannel<T>>()
            .expect("channel stored under its own TypeId")
    }

    // -- structural mutation --------------------------------------------------------------------

    pub fn command_buffer(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    /// Applies every queued command in log order, the only place archetype migration happens
    /// (spec 4.6), then drops now-empty archetypes' storage.
    pub fn flush(&mut self) {
        self.command_buffer.flush(
            &mut self.entities,
            &self.registry,
            &mut self.archetypes,
            &mut self.location,
            &mut self.enabled,
            &self.component_events,
            self.frame,
        );
        self.archetypes.retain_nonempty();
    }

    pub fn archetypes(&self) -> &ArchetypeIndex {
        &self.archetypes
    }

    pub fn archetypes_mut(&mut self) -> &mut ArchetypeIndex {
        &mut self.archetypes
    }

    /// Internal structural-invariant check across every archetype (spec 9, invariants 1-3).
    pub fn verify(&self) -> EcsResult<()> {
        for archetype in self.archetypes.iter() {
            archetype.verify()?;
        }
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

/// Spawns a `TypedColumn` or `ArrayColumn` for `type_id` depending on whether it was registered
/// with a schema (spec 3, "types without a schema fall back to heterogeneous columns").
pub fn spawn_column_for(registry: &ComponentRegistry, type_id: ComponentTypeId) -> Box<dyn crate::column::Column> {
    match registry.schema_of(type_id) {
        Some(schema) => Box::new(TypedColumn::new(schema.clone())),
        None => Box::new(ArrayColumn::new()),
    }
}

impl World {
    /// Looks up, or lazily creates, the archetype for exactly `type_ids` (order-independent, spec
    /// invariant 5). Exposed for the query/dispatch layers that need to resolve a signature to an
    /// archetype id without going through the command buffer.
    pub fn archetype_for(&mut self, type_ids: &[ComponentTypeId]) -> ArchetypeId {
        let registry = &self.registry;
        self.archetypes.get_or_create(type_ids, |tid| spawn_column_for(registry, tid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScalarKind;

    struct Position;

    #[test]
    fn create_then_flush_places_entity_in_empty_archetype() {
        let mut world = World::new();
        let e = world.create_entity(true);
        world.flush();
        assert!(world.is_alive(e));
        assert!(world.is_enabled(e));
        assert_eq!(world.archetype_of(e).unwrap().type_ids(), &[] as &[u32]);
    }

    #[test]
    fn add_and_read_back_schema_component() {
        let mut world = World::new();
        let position = world
            .register_component_with_schema::<Position>(
                "Position",
                Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]),
            )
            .unwrap();
        let e = world.create_entity(true);
        world.flush();

        let mut values = ComponentValues::new();
        values.set("x", crate::value::Scalar::F32(3.0));
        values.set("y", crate::value::Scalar::F32(4.0));
        world.add_component(e, position, values);
        world.flush();

        assert!(world.has_component(e, position));
        let snapshot = world.get_component(e, position).unwrap();
        assert_eq!(snapshot.get("x"), Some(crate::value::Scalar::F32(3.0)));
    }

    #[test]
    fn destroy_invalidates_handle() {
        let mut world = World::new();
        let e = world.create_entity(true);
        world.flush();
        world.destroy_entity(e);
        world.flush();
        assert!(!world.is_alive(e));
        assert!(world.archetype_of(e).is_none());
    }

    #[test]
    fn insertion_order_independent_archetype_signature_via_world() {
        let mut w1 = World::new();
        struct A;
        struct B;
        struct C;
        let a1 = w1.register_component::<A>("A").unwrap();
        let b1 = w1.register_component::<B>("B").unwrap();
        let c1 = w1.register_component::<C>("C").unwrap();
        let e1 = w1.create_entity(true);
        w1.flush();
        w1.add_component(e1, a1, ComponentValues::new());
        w1.add_component(e1, b1, ComponentValues::new());
        w1.add_component(e1, c1, ComponentValues::new());
        w1.flush();

        let mut w2 = World::new();
        let c2 = w2.register_component::<C>("C").unwrap();
        let a2 = w2.register_component::<A>("A").unwrap();
        let b2 = w2.register_component::<B>("B").unwrap();
        let e2 = w2.create_entity(true);
        w2.flush();
        w2.add_component(e2, c2, ComponentValues::new());
        w2.add_component(e2, a2, ComponentValues::new());
        w2.add_component(e2, b2, ComponentValues::new());
        w2.flush();

        let mut k1 = w1.archetype_of(e1).unwrap().type_ids().to_vec();
        let mut k2 = w2.archetype_of(e2).unwrap().type_ids().to_vec();
        k1.sort();
        k2.sort();
        assert_eq!(k1.len(), 3);
        assert_eq!(k1, k2);
    }

    #[test]
    fn custom_event_channel_round_trips() {
        let mut world = World::new();
        #[derive(Debug)]
        struct Tick(u32);
        world.event_channel::<Tick>().emit(Tick(1));
        world.event_channel::<Tick>().emit(Tick(2));
        let got = world.event_channel::<Tick>().take_all();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, 1);
    }
}
