//! Process-wide (here: per-`World`) component type registry (spec 4.1).
//!
//! Grounded on the registry sketch in spec 4.1 and on the teacher's `TypeId`-keyed `Resources` map
//! (`examples/0x112233-legion/src/resource.rs`) for the "monotonic id keyed by `TypeId`" pattern.
use std::any::TypeId;

use fxhash::FxHashMap;

use crate::error::EcsError;

pub type ComponentTypeId = u32;

/// Scalar field kinds a schema field may carry (spec 3).
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum ScalarKind {
    F32,
    F64,
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    Bool,
}

impl ScalarKind {
    pub fn element_bytes(self) -> usize {
        match self {
            ScalarKind::F32 | ScalarKind::I32 | ScalarKind::U32 => 4,
            ScalarKind::F64 => 8,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I8 | ScalarKind::U8 | ScalarKind::Bool => 1,
        }
    }
}

/// Ordered list of named, typed scalar fields a component opts into for shared-memory storage
/// (spec 3, 4.2).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, ScalarKind)>,
}

impl Schema {
    pub fn new(fields: Vec<(&str, ScalarKind)>) -> Self {
        Schema { fields: fields.into_iter().map(|(n, k)| (n.to_string(), k)).collect() }
    }

    pub fn fields(&self) -> &[(String, ScalarKind)] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

struct Registration {
    rust_type: TypeId,
    name: &'static str,
    schema: Option<Schema>,
}

/// Assigns each concrete component type a dense, process-stable `typeId` the first time it is
/// registered. Ids start at `1`; `0` is reserved (spec 4.1).
#[derive(Default)]
pub struct ComponentRegistry {
    by_rust_type: FxHashMap<TypeId, ComponentTypeId>,
    by_name: FxHashMap<&'static str, ComponentTypeId>,
    registrations: Vec<Registration>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        let mut r = ComponentRegistry::default();
        r.registrations.push(Registration { rust_type: TypeId::of::<()>(), name: "<reserved>", schema: None });
        r
    }

    pub fn register<T: 'static>(&mut self, name: &'static str) -> Result<ComponentTypeId, EcsError> {
        self.register_with_schema::<T>(name, None)
    }

    pub fn register_with_schema<T: 'static>(
        &mut self,
        name: &'static str,
        schema: Option<Schema>,
    ) -> Result<ComponentTypeId, EcsError> {
        let rust_type = TypeId::of::<T>();
        if let Some(&id) = self.by_rust_type.get(&rust_type) {
            return Ok(id);
        }
        if let Some(&existing) = self.by_name.get(name) {
            if self.registrations[existing as usize].rust_type != rust_type {
                return Err(EcsError::Registration(format!(
                    "component name '{}' is already registered to a different type",
                    name
                )));
            }
        }
        let id = self.registrations.len() as ComponentTypeId;
        self.registrations.push(Registration { rust_type, name, schema });
        self.by_rust_type.insert(rust_type, id);
        self.by_name.insert(name, id);
        tracing::debug!(type_id = id, name, "registered component type");
        Ok(id)
    }

    pub fn type_id_of<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_rust_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn type_id_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn schema_of(&self, id: ComponentTypeId) -> Option<&Schema> {
        self.registrations.get(id as usize).and_then(|r| r.schema.as_ref())
    }

    pub fn name_of(&self, id: ComponentTypeId) -> Option<&'static str> {
        self.registrations.get(id as usize).map(|r| r.name)
    }

    pub fn len(&self) -> usize {
        self.registrations.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ComponentTypeId> {
        1..(self.registrations.len() as ComponentTypeId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;

    #[test]
    fn register_is_idempotent() {
        let mut r = ComponentRegistry::new();
        let a = r.register::<Position>("Position").unwrap();
        let b = r.register::<Position>("Position").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ids_start_at_one_and_are_dense() {
        let mut r = ComponentRegistry::new();
        let a = r.register::<Position>("Position").unwrap();
        let b = r.register::<Velocity>("Velocity").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn name_conflict_with_different_type_fails() {
        let mut r = ComponentRegistry::new();
        r.register::<Position>("Thing").unwrap();
        let err = r.register::<Velocity>("Thing").unwrap_err();
        assert!(matches!(err, EcsError::Registration(_)));
    }

    #[test]
    fn registration_order_does_not_affect_id_assignment_for_same_program() {
        let mut r1 = ComponentRegistry::new();
        let p1 = r1.register::<Position>("Position").unwrap();
        let v1 = r1.register::<Velocity>("Velocity").unwrap();

        let mut r2 = ComponentRegistry::new();
        let v2 = r2.register::<Velocity>("Velocity").unwrap();
        let p2 = r2.register::<Position>("Position").unwrap();

        // each registry is internally dense/stable; what matters for archetype signatures
        // (invariant 5) is that the *set* is what's hashed, not these raw ids.
        assert_eq!(p1, 1);
        assert_eq!(v1, 2);
        assert_eq!(v2, 1);
        assert_eq!(p2, 2);
    }
}
