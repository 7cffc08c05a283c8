//! Canonical save-record shape (spec 6), gated behind the `serialize` feature.
//!
//! Implements the `typeName`-keyed shape the spec picks over the numeric-`typeId`-keyed
//! alternative (see DESIGN.md's Open Question resolution): `typeId`s are only stable within one
//! process run (spec 4.1), while names survive across runs and across the registration-order
//! permutations invariant 5 requires. Uses `serde`/`serde_json` (both teacher dependencies, see
//! `Cargo.toml`).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value::{ComponentValues, Scalar};
use crate::world::World;

/// On-wire scalar representation (spec 6's `canonicalizedValue`): numbers serialize through
/// `serde_json::Number`, so `1.0_f32` and `1_i32` both round-trip as plain JSON numbers rather
/// than a tagged enum a reader would have to special-case.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum WireScalar {
    Number(f64),
    Bool(bool),
}

impl From<Scalar> for WireScalar {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Bool(b) => WireScalar::Bool(b),
            other => WireScalar::Number(other.as_f64()),
        }
    }
}

/// One entity's record: `guid` (spec 6, "GUIDs are 64-bit, split into two 32-bit halves") and a
/// `typeName -> value` map sorted for stable diffing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntityRecord {
    pub guid_hi: u32,
    pub guid_lo: u32,
    pub components: BTreeMap<String, BTreeMap<String, WireScalar>>,
}

/// The persisted-state layout described in spec 6: `{ version, entities: [...] }`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SaveRecord {
    pub version: u32,
    pub entities: Vec<EntityRecord>,
}

pub const CURRENT_VERSION: u32 = 1;

/// Builds a `SaveRecord` for every live entity in `world`, restricted to `type_ids` if given.
/// Entities are emitted in ascending `(guid_hi, guid_lo)` order when a `Guid` component is
/// registered, otherwise in ascending entity-index order, matching the stable-key ordering the
/// state hasher uses (spec 4.10) so a save record's entity order is itself deterministic.
pub fn snapshot_world(world: &World, type_ids: Option<&[crate::registry::ComponentTypeId]>) -> SaveRecord {
    let registry = world.registry();
    let guid_type = registry.type_id_by_name("Guid");
    let mut ids: Vec<_> = match type_ids {
        Some(ids) => ids.to_vec(),
        None => registry.iter_ids().collect(),
    };
    ids.sort_unstable();

    let mut entities = Vec::new();
    for archetype in world.archetypes().iter() {
        for &entity in archetype.entities() {
            let (guid_hi, guid_lo) = guid_type
                .and_then(|gt| archetype.component_snapshot(entity, gt))
                .and_then(|v| match (v.get("hi"), v.get("lo")) {
                    (Some(Scalar::U32(hi)), Some(Scalar::U32(lo))) => Some((hi, lo)),
                    _ => None,
                })
                .unwrap_or((0, entity.index()));

            let mut components = BTreeMap::new();
            for &type_id in &ids {
                if let Some(values) = archetype.component_snapshot(entity, type_id) {
                    if let Some(name) = registry.name_of(type_id) {
                        components.insert(name.to_string(), wire_values(&values));
                    }
                }
            }
            if components.is_empty() {
                continue;
            }
            entities.push(EntityRecord { guid_hi, guid_lo, components });
        }
    }
    entities.sort_by_key(|e| (e.guid_hi, e.guid_lo));

    SaveRecord { version: CURRENT_VERSION, entities }
}

fn wire_values(values: &ComponentValues) -> BTreeMap<String, WireScalar> {
    values.iter().map(|(k, v)| (k.to_string(), WireScalar::from(v))).collect()
}

/// Serializes a `SaveRecord` to a pretty JSON string (spec 6's external-serializer boundary; the
/// core only defines the shape, not a persistence mechanism).
pub fn to_json(record: &SaveRecord) -> serde_json::Result<String> {
    serde_json::to_string_pretty(record)
}

pub fn from_json(text: &str) -> serde_json::Result<SaveRecord> {
    serde_json::from_str(text)
}

/// Round-trips a `SaveRecord` through `serde_json::Value` for callers that want to inspect or
/// patch the document before writing it out, without committing to the typed `SaveRecord` shape.
pub fn to_json_value(record: &SaveRecord) -> serde_json::Result<JsonValue> {
    serde_json::to_value(record)
}
