//! Process-scoped singleton resources, keyed by Rust type (spec 4, "resources map in the world is
//! the single owner").
//!
//! Grounded on `examples/0x112233-legion/src/resource.rs` (`Resources`, `Read`/`Write` guards);
//! replaced the teacher's hand-rolled `AtomicRefCell`/`Shared`/`Exclusive` borrow cell (local to
//! `legion_core`, not in this retrieval pack) with `parking_lot::RwLock` (teacher dependency),
//! which gives the same "interior-mutable map of boxed values" role without re-deriving a custom
//! runtime-borrow-checked cell.
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use fxhash::FxHashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait Resource: 'static + Any + Send + Sync {}
impl<T> Resource for T where T: 'static + Any + Send + Sync {}

#[derive(Default)]
pub struct Resources {
    storage: FxHashMap<TypeId, RwLock<Box<dyn Any + Send + Sync>>>,
}

impl Resources {
    pub fn new() -> Self {
        Resources::default()
    }

    /// Inserts `value`, replacing any existing resource of the same type.
    pub fn insert<T: Resource>(&mut self, value: T) {
        self.storage.insert(TypeId::of::<T>(), RwLock::new(Box::new(value)));
    }

    pub fn remove<T: Resource>(&mut self) -> bool {
        self.storage.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: Resource>(&self) -> bool {
        self.storage.contains_key(&TypeId::of::<T>())
    }

    pub fn get<T: Resource>(&self) -> Option<Read<'_, T>> {
        let cell = self.storage.get(&TypeId::of::<T>())?;
        Some(Read { guard: cell.read(), marker: PhantomData })
    }

    pub fn get_mut<T: Resource>(&self) -> Option<Write<'_, T>> {
        let cell = self.storage.get(&TypeId::of::<T>())?;
        Some(Write { guard: cell.write(), marker: PhantomData })
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

pub struct Read<'a, T: Resource> {
    guard: RwLockReadGuard<'a, Box<dyn Any + Send + Sync>>,
    marker: PhantomData<T>,
}

impl<'a, T: Resource> Deref for Read<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.downcast_ref::<T>().expect("resource stored under its own TypeId")
    }
}

pub struct Write<'a, T: Resource> {
    guard: RwLockWriteGuard<'a, Box<dyn Any + Send + Sync>>,
    marker: PhantomData<T>,
}

impl<'a, T: Resource> Deref for Write<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.downcast_ref::<T>().expect("resource stored under its own TypeId")
    }
}

impl<'a, T: Resource> DerefMut for Write<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.downcast_mut::<T>().expect("resource stored under its own TypeId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock {
        value: u32,
    }

    #[test]
    fn insert_then_read() {
        let mut resources = Resources::new();
        resources.insert(Clock { value: 7 });
        assert_eq!(resources.get::<Clock>().unwrap().value, 7);
    }

    #[test]
    fn write_guard_mutates_in_place() {
        let mut resources = Resources::new();
        resources.insert(Clock { value: 1 });
        resources.get_mut::<Clock>().unwrap().value = 2;
        assert_eq!(resources.get::<Clock>().unwrap().value, 2);
    }

    #[test]
    fn missing_resource_is_none() {
        let resources = Resources::new();
        assert!(resources.get::<Clock>().is_none());
    }

    #[test]
    fn remove_drops_resource() {
        let mut resources = Resources::new();
        resources.insert(Clock { value: 1 });
        assert!(resources.remove::<Clock>());
        assert!(resources.get::<Clock>().is_none());
    }
}
