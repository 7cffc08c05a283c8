//! Dynamic component values (spec 9: "tagged-union-of-boxed-values or direct typed columns").
use std::collections::BTreeMap;
use std::fmt::Debug;

use downcast_rs::{impl_downcast, Downcast};

use crate::registry::ScalarKind;

/// A single scalar value tagged by kind; the unit of storage for one schema field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    F32(f32),
    F64(f64),
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
            Scalar::I8(v) => v as f64,
            Scalar::I16(v) => v as f64,
            Scalar::I32(v) => v as f64,
            Scalar::U8(v) => v as f64,
            Scalar::U16(v) => v as f64,
            Scalar::U32(v) => v as f64,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn kind(self) -> ScalarKind {
        match self {
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::U8(_) => ScalarKind::U8,
            Scalar::U16(_) => ScalarKind::U16,
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::Bool(_) => ScalarKind::Bool,
        }
    }

    pub fn zero(kind: ScalarKind) -> Scalar {
        match kind {
            ScalarKind::F32 => Scalar::F32(0.0),
            ScalarKind::F64 => Scalar::F64(0.0),
            ScalarKind::I8 => Scalar::I8(0),
            ScalarKind::I16 => Scalar::I16(0),
            ScalarKind::I32 => Scalar::I32(0),
            ScalarKind::U8 => Scalar::U8(0),
            ScalarKind::U16 => Scalar::U16(0),
            ScalarKind::U32 => Scalar::U32(0),
            ScalarKind::Bool => Scalar::Bool(false),
        }
    }

    /// Coerces an arbitrary numeric value to `kind`; truthy-to-bool for `Bool`, matching the
    /// `writeFromObject` coercion contract (spec 4.2).
    pub fn coerce(kind: ScalarKind, value: f64) -> Scalar {
        match kind {
            ScalarKind::F32 => Scalar::F32(value as f32),
            ScalarKind::F64 => Scalar::F64(value),
            ScalarKind::I8 => Scalar::I8(value as i8),
            ScalarKind::I16 => Scalar::I16(value as i16),
            ScalarKind::I32 => Scalar::I32(value as i32),
            ScalarKind::U8 => Scalar::U8(value as u8),
            ScalarKind::U16 => Scalar::U16(value as u16),
            ScalarKind::U32 => Scalar::U32(value as u32),
            ScalarKind::Bool => Scalar::Bool(value != 0.0),
        }
    }
}

/// Ordered, named dynamic record used by the schema-backed `writeFromObject`/`readToObject`
/// contract (spec 4.2). Backed by a `BTreeMap` so iteration order is always sorted by key,
/// matching the hasher's "object key ordering" canonicalization requirement (spec 4.10).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentValues {
    fields: BTreeMap<String, Scalar>,
}

impl ComponentValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Scalar) -> &mut Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Scalar) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<Scalar> {
        self.fields.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Purges any key not present in `allowed`, per the `readToObject` contract (spec 4.2): the
    /// output must be a faithful picture of the row, never carrying stale keys from a previous
    /// schema.
    pub fn retain_keys(&mut self, allowed: &[(String, ScalarKind)]) {
        self.fields.retain(|k, _| allowed.iter().any(|(n, _)| n == k));
    }
}

/// Boxed heterogeneous component value used by `ArrayColumn` for types with no registered schema
/// (spec 4.3). Any `Clone + Debug + Send + Sync + 'static` type qualifies automatically.
pub trait DynComponent: Downcast + Debug + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn DynComponent>;
}
impl_downcast!(DynComponent);

impl<T> DynComponent for T
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn clone_boxed(&self) -> Box<dyn DynComponent> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn DynComponent> {
    fn clone(&self) -> Self {
        self.as_ref().clone_boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_values_keys_are_sorted() {
        let mut v = ComponentValues::new();
        v.set("y", Scalar::F32(1.0));
        v.set("x", Scalar::F32(2.0));
        let keys: Vec<_> = v.keys().collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn retain_keys_purges_stale_entries() {
        let mut v = ComponentValues::new();
        v.set("x", Scalar::F32(1.0));
        v.set("stale", Scalar::F32(2.0));
        let schema = vec![("x".to_string(), ScalarKind::F32)];
        v.retain_keys(&schema);
        assert_eq!(v.len(), 1);
        assert!(v.get("stale").is_none());
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Blob(Vec<u8>);

    #[test]
    fn dyn_component_clone_and_downcast() {
        let boxed: Box<dyn DynComponent> = Box::new(Blob(vec![1, 2, 3]));
        let cloned = boxed.clone();
        let recovered = cloned.downcast_ref::<Blob>().unwrap();
        assert_eq!(recovered, &Blob(vec![1, 2, 3]));
    }
}
