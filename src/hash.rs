//! Canonical, replay-stable world hashing (spec 4.10).
//!
//! Grounded on the FNV-1a byte stream described in spec 4.10 and hand-rolled for the same reason
//! as `src/prng.rs`: canonicalization (NaN/±Inf/-0 sentinels, fixed-scale quantization) has to be
//! auditable inline rather than threaded through a black-box `Hasher` impl. The k-way merge uses
//! `std::collections::BinaryHeap` (plain control flow, not an ambient concern any teacher crate
//! covers).
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::registry::{ComponentTypeId, ScalarKind};
use crate::value::{ComponentValues, Scalar};
use crate::world::World;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Quantization scale for canonicalizing finite floats into hashable integers (spec 4.10).
const QUANTIZE_SCALE: f64 = 1000.0;

const NAN_SENTINEL: i64 = i64::MIN;
const POS_INF_SENTINEL: i64 = i64::MAX;
const NEG_INF_SENTINEL: i64 = i64::MIN + 1;

/// Incremental FNV-1a 32-bit hasher over a canonical byte stream (spec 4.10).
#[derive(Clone, Copy, Debug)]
pub struct StateHasher {
    state: u32,
}

impl Default for StateHasher {
    fn default() -> Self {
        StateHasher::new()
    }
}

impl StateHasher {
    pub fn new() -> Self {
        StateHasher { state: FNV_OFFSET_BASIS }
    }

    pub fn finish(self) -> u32 {
        self.state
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u32;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, tag: u8) {
        self.write_bytes(&[tag]);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    /// Mixes one canonicalized scalar into the stream: a one-byte kind tag (so `1_i32` and
    /// `1.0_f32` never collide) followed by the canonicalized integer or bool payload.
    pub fn write_scalar(&mut self, value: Scalar) {
        self.write_u8(scalar_kind_tag(value.kind()));
        match value {
            Scalar::Bool(b) => self.write_u8(b as u8),
            _ => self.write_i64(canonicalize_numeric(value.as_f64())),
        }
    }

    /// Mixes a whole `ComponentValues` record, sorted by field name (spec 4.10's "object key
    /// ordering: keys sorted before hashing").
    pub fn write_component_values(&mut self, values: &ComponentValues) {
        let mut keys: Vec<&str> = values.keys().collect();
        keys.sort_unstable();
        self.write_u32(keys.len() as u32);
        for key in keys {
            self.write_str(key);
            self.write_scalar(values.get(key).expect("key came from this record's own key set"));
        }
    }
}

fn scalar_kind_tag(kind: ScalarKind) -> u8 {
    match kind {
        ScalarKind::F32 => 0,
        ScalarKind::F64 => 1,
        ScalarKind::I8 => 2,
        ScalarKind::I16 => 3,
        ScalarKind::I32 => 4,
        ScalarKind::U8 => 5,
        ScalarKind::U16 => 6,
        ScalarKind::U32 => 7,
        ScalarKind::Bool => 8,
    }
}

/// Canonicalizes a finite/NaN/infinite `f64` into a hashable `i64` (spec 4.10): NaN and each
/// infinity map to a fixed sentinel distinct from any quantized finite value, `-0` quantizes to
/// plain `0`, and every other finite value is quantized to a fixed integer scale so that e.g.
/// `1.0000001` and `0.9999999` (representation noise) hash identically.
fn canonicalize_numeric(v: f64) -> i64 {
    if v.is_nan() {
        NAN_SENTINEL
    } else if v == f64::INFINITY {
        POS_INF_SENTINEL
    } else if v == f64::NEG_INFINITY {
        NEG_INF_SENTINEL
    } else {
        let scaled = v * QUANTIZE_SCALE;
        if scaled == 0.0 {
            0
        } else {
            scaled.round() as i64
        }
    }
}

/// Stable per-entity sort key for the k-way merge (spec 4.10 step 2): a GUID component's string
/// rendering if present, otherwise the raw entity index. GUID-keyed entities sort ahead of
/// index-keyed ones; within a group, ascending.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
enum StableKey {
    Guid(String),
    Index(u32),
}

struct MergeItem {
    key: StableKey,
    values: Option<ComponentValues>,
}

impl PartialEq for MergeItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for MergeItem {}

impl Ord for MergeItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first (min-heap per spec).
        other.key.cmp(&self.key)
    }
}
impl PartialOrd for MergeItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Computes a 32-bit hash of `world`'s observable state, restricted to `type_ids` if given
/// (spec 4.10). The hash is invariant under entity insertion order within an archetype, component
/// registration order, and the representation choices canonicalized above.
pub fn hash_world(world: &World, type_ids: Option<&[ComponentTypeId]>) -> u32 {
    let registry = world.registry();
    let ids: Vec<ComponentTypeId> = match type_ids {
        Some(ids) => ids.to_vec(),
        None => registry.iter_ids().collect(),
    };
    // `ComponentTypeId` is a registration-order-dependent counter (spec 4.1): two worlds that
    // register the same named components in a different order must still hash identically, so
    // group and order by the component's stable name rather than its numeric id.
    let mut named: Vec<(&'static str, ComponentTypeId)> =
        ids.into_iter().filter_map(|id| registry.name_of(id).map(|name| (name, id))).collect();
    named.sort_unstable_by_key(|(name, _)| *name);

    let guid_type = registry.type_id_by_name("Guid");

    let mut hasher = StateHasher::new();
    for (name, type_id) in named {
        hasher.write_u8(1); // type-tag marker
        hasher.write_str(name);

        let mut heap: BinaryHeap<MergeItem> = BinaryHeap::new();
        for archetype in world.archetypes().iter() {
            if !archetype.has_type(type_id) {
                continue;
            }
            for (row, &entity) in archetype.entities().iter().enumerate() {
                let key = stable_key(archetype, guid_type, row, entity.index());
                let values = archetype.component_snapshot(entity, type_id);
                heap.push(MergeItem { key, values });
            }
        }

        let mut count: u32 = 0;
        while let Some(item) = heap.pop() {
            write_stable_key(&mut hasher, &item.key);
            if let Some(values) = &item.values {
                hasher.write_component_values(values);
            }
            count += 1;
        }
        hasher.write_u32(count);
    }

    hasher.write_u32(world.frame());
    if let Some(prng) = world.resource::<crate::prng::Xorshift128PlusPrng>() {
        hasher.write_u64(prng.state0());
        hasher.write_u64(prng.state1());
    }

    hasher.finish()
}

fn stable_key(
    archetype: &crate::archetype::Archetype,
    guid_type: Option<ComponentTypeId>,
    row: usize,
    entity_index: u32,
) -> StableKey {
    if let Some(guid_type) = guid_type {
        if archetype.has_type(guid_type) {
            let entity = archetype.entities()[row];
            if let Some(values) = archetype.component_snapshot(entity, guid_type) {
                if let (Some(Scalar::U32(hi)), Some(Scalar::U32(lo))) = (values.get("hi"), values.get("lo")) {
                    return StableKey::Guid(format!("{:08x}{:08x}", hi, lo));
                }
            }
        }
    }
    StableKey::Index(entity_index)
}

fn write_stable_key(hasher: &mut StateHasher, key: &StableKey) {
    match key {
        StableKey::Guid(s) => {
            hasher.write_u8(0);
            hasher.write_str(s);
        }
        StableKey::Index(i) => {
            hasher.write_u8(1);
            hasher.write_u32(*i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScalarKind;
    use crate::registry::Schema;

    struct Position;

    fn build_world() -> (World, ComponentTypeId) {
        let mut world = World::new();
        let position = world
            .register_component_with_schema::<Position>(
                "Position",
                Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]),
            )
            .unwrap();
        (world, position)
    }

    fn spawn(world: &mut World, position: ComponentTypeId, x: f32, y: f32) {
        let e = world.create_entity(true);
        world.flush();
        let mut values = ComponentValues::new();
        values.set("x", Scalar::F32(x));
        values.set("y", Scalar::F32(y));
        world.add_component(e, position, values);
        world.flush();
    }

    #[test]
    fn hash_is_invariant_under_insertion_order() {
        let (mut w1, p1) = build_world();
        spawn(&mut w1, p1, 1.0, 2.0);
        spawn(&mut w1, p1, 3.0, 4.0);

        let (mut w2, p2) = build_world();
        spawn(&mut w2, p2, 3.0, 4.0);
        spawn(&mut w2, p2, 1.0, 2.0);

        assert_eq!(hash_world(&w1, None), hash_world(&w2, None));
    }

    #[test]
    fn hash_changes_when_a_value_changes() {
        let (mut w1, p1) = build_world();
        spawn(&mut w1, p1, 1.0, 2.0);

        let (mut w2, p2) = build_world();
        spawn(&mut w2, p2, 1.0, 2.5);

        assert_ne!(hash_world(&w1, None), hash_world(&w2, None));
    }

    #[test]
    fn negative_zero_hashes_like_positive_zero() {
        let (mut w1, p1) = build_world();
        spawn(&mut w1, p1, -0.0, 0.0);

        let (mut w2, p2) = build_world();
        spawn(&mut w2, p2, 0.0, 0.0);

        assert_eq!(hash_world(&w1, None), hash_world(&w2, None));
    }

    #[test]
    fn nan_hashes_consistently() {
        let (mut w1, p1) = build_world();
        spawn(&mut w1, p1, f32::NAN, 0.0);

        let (mut w2, p2) = build_world();
        spawn(&mut w2, p2, f32::NAN, 0.0);

        assert_eq!(hash_world(&w1, None), hash_world(&w2, None));
    }

    #[test]
    fn restricting_to_a_type_subset_ignores_other_types() {
        struct Velocity;
        let (mut w1, p1) = build_world();
        let velocity = w1
            .register_component_with_schema::<Velocity>("Velocity", Schema::new(vec![("x", ScalarKind::F32)]))
            .unwrap();
        let e = w1.create_entity(true);
        w1.flush();
        let mut pv = ComponentValues::new();
        pv.set("x", Scalar::F32(1.0));
        pv.set("y", Scalar::F32(2.0));
        w1.add_component(e, p1, pv);
        let mut vv = ComponentValues::new();
        vv.set("x", Scalar::F32(99.0));
        w1.add_component(e, velocity, vv);
        w1.flush();

        let (mut w2, p2) = build_world();
        spawn(&mut w2, p2, 1.0, 2.0);

        assert_eq!(hash_world(&w1, Some(&[p1])), hash_world(&w2, Some(&[p2])));
    }
}
