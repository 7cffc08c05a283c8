//! Archetypes and the archetype index (spec 4.4).
//!
//! Grounded on `examples/0x112233-legion/src/lib.rs`'s `World::archetype` lookup (linear scan over
//! a small `Vec` of archetypes, insert-on-miss), generalized to an `FxHashMap` keyed by the sorted
//! type-id set so `match(required, forbidden)` stays cheap as the archetype count grows.
use std::collections::BTreeMap;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::column::Column;
use crate::entity::Entity;
use crate::error::{EcsError, EcsResult};
use crate::registry::ComponentTypeId;

pub type ArchetypeId = u32;
pub type TypeIdSet = SmallVec<[ComponentTypeId; 8]>;

fn sorted_key(type_ids: &[ComponentTypeId]) -> TypeIdSet {
    let mut key: TypeIdSet = type_ids.iter().copied().collect();
    key.sort_unstable();
    key.dedup();
    key
}

/// The columnar home for every entity sharing exactly one set of component types (spec 4.4).
pub struct Archetype {
    id: ArchetypeId,
    type_ids: TypeIdSet,
    entities: Vec<Entity>,
    row_of: FxHashMap<Entity, usize>,
    cols: BTreeMap<ComponentTypeId, Box<dyn Column>>,
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("type_ids", &self.type_ids)
            .field("len", &self.entities.len())
            .finish()
    }
}

impl Archetype {
    fn new(id: ArchetypeId, type_ids: TypeIdSet, cols: BTreeMap<ComponentTypeId, Box<dyn Column>>) -> Self {
        Archetype { id, type_ids, entities: Vec::new(), row_of: FxHashMap::default(), cols }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn type_ids(&self) -> &[ComponentTypeId] {
        &self.type_ids
    }

    pub fn has_type(&self, type_id: ComponentTypeId) -> bool {
        self.type_ids.contains(&type_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn row_of(&self, entity: Entity) -> Option<usize> {
        self.row_of.get(&entity).copied()
    }

    pub fn column(&self, type_id: ComponentTypeId) -> Option<&dyn Column> {
        self.cols.get(&type_id).map(|c| c.as_ref())
    }

    pub fn column_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut dyn Column> {
        self.cols.get_mut(&type_id).map(|c| c.as_mut())
    }

    pub fn columns(&self) -> impl Iterator<Item = (ComponentTypeId, &dyn Column)> {
        self.cols.iter().map(|(&tid, c)| (tid, c.as_ref()))
    }

    /// Disjoint `&mut dyn Column` borrows for every type id in `type_ids`, from one exclusive
    /// borrow of `self.cols` (`BTreeMap::iter_mut` + filter) — lets a kernel dispatcher hold its
    /// one write column and several read columns at once without two separate `column_mut`/
    /// `column` calls colliding under the borrow checker.
    pub fn columns_mut(&mut self, type_ids: &[ComponentTypeId]) -> FxHashMap<ComponentTypeId, &mut dyn Column> {
        self.cols
            .iter_mut()
            .filter(|(tid, _)| type_ids.contains(tid))
            .map(|(&tid, col)| (tid, col.as_mut()))
            .collect()
    }

    /// Inserts `entity` at the tail of every column. `make_default` is called once per column
    /// before anything is mutated so a failing default leaves the archetype untouched (spec 4.4:
    /// "validate first, then commit").
    pub fn push(
        &mut self,
        entity: Entity,
        epoch: u32,
        make_default: impl Fn(ComponentTypeId) -> EcsResult<()>,
    ) -> EcsResult<usize> {
        if self.row_of.contains_key(&entity) {
            return Err(EcsError::Invariant(format!("entity {:?} already present in archetype", entity)));
        }
        for &tid in &self.type_ids {
            make_default(tid)?;
        }
        let row = self.entities.len();
        for col in self.cols.values_mut() {
            let pushed_row = col.push_default();
            debug_assert_eq!(pushed_row, row);
            col.mark_written_range(row, row + 1, epoch);
        }
        self.entities.push(entity);
        self.row_of.insert(entity, row);
        Ok(row)
    }

    /// Removes `row` from every column and the entity table by swapping in the last row.
    pub fn swap_remove(&mut self, row: usize) -> EcsResult<Entity> {
        let len = self.entities.len();
        if row >= len {
            return Err(EcsError::RowOutOfRange { row, len });
        }
        let removed = self.entities[row];
        let last = len - 1;
        for col in self.cols.values_mut() {
            col.swap_remove(row);
        }
        self.entities.swap_remove(row);
        self.row_of.remove(&removed);
        if row != last {
            let moved = self.entities[row];
            self.row_of.insert(moved, row);
        }
        Ok(removed)
    }

    /// Removes all rows but keeps column/schema structure in place.
    pub fn clear_rows(&mut self) {
        while !self.entities.is_empty() {
            let _ = self.swap_remove(0);
        }
    }

    /// Rows written (by any tracked backing) since `since_frame`, dispatched per column kind (spec
    /// 9's resolved cross-backend `changed_since` semantics — see DESIGN.md).
    pub fn changed_since(&self, type_id: ComponentTypeId, since_frame: u32) -> Vec<usize> {
        use crate::column::ArrayColumn;
        let Some(col) = self.cols.get(&type_id) else { return Vec::new() };
        if let Some(arr) = col.as_ref().as_any().downcast_ref::<ArrayColumn>() {
            arr.changed_since(since_frame)
        } else {
            // TypedColumn's write mask is drained per-frame by the flush pipeline into a standing
            // per-archetype record; callers that need live, undrained state call
            // `is_row_written` directly on individual rows instead.
            (0..col.len()).filter(|&r| col.is_row_written(r)).collect()
        }
    }

    /// Returns an owned copy of one component's value for `entity`, never a live alias (spec
    /// 4.4's snapshot contract), by round-tripping through a scratch `ComponentValues`.
    pub fn component_snapshot(
        &self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Option<crate::value::ComponentValues> {
        let row = self.row_of(entity)?;
        let col = self.cols.get(&type_id)?;
        let mut out = crate::value::ComponentValues::new();
        col.read_to_object(row, &mut out);
        Some(out)
    }

    /// Internal structural-invariant check (spec 9, invariants 1-3); used by tests and by the
    /// command-buffer flush path in debug builds.
    pub fn verify(&self) -> EcsResult<()> {
        for (tid, col) in &self.cols {
            if col.len() != self.entities.len() {
                return Err(EcsError::Invariant(format!(
                    "column {} length {} does not match archetype entity count {}",
                    tid,
                    col.len(),
                    self.entities.len()
                )));
            }
        }
        if self.row_of.len() != self.entities.len() {
            return Err(EcsError::Invariant("rowOf size does not match entities length".into()));
        }
        for (row, &e) in self.entities.iter().enumerate() {
            match self.row_of.get(&e) {
                Some(&r) if r == row => {}
                _ => return Err(EcsError::Invariant(format!("rowOf mapping inconsistent for entity {:?}", e))),
            }
        }
        let mut seen = std::collections::HashSet::with_capacity(self.entities.len());
        for &e in &self.entities {
            if !seen.insert(e) {
                return Err(EcsError::Invariant(format!("duplicate entity {:?} in archetype", e)));
            }
        }
        Ok(())
    }
}

/// Maps the sorted type-id set identifying an archetype to its single instance (spec 4.4).
#[derive(Default)]
pub struct ArchetypeIndex {
    by_key: FxHashMap<TypeIdSet, ArchetypeId>,
    archetypes: Vec<Archetype>,
}

impl ArchetypeIndex {
    pub fn new() -> Self {
        ArchetypeIndex::default()
    }

    /// Returns the archetype for `type_ids` (any order, duplicates tolerated), constructing it
    /// via `spawn_column` on first use so the signature depends only on the *set* of type ids
    /// (spec invariant 5), never on registration order.
    pub fn get_or_create(
        &mut self,
        type_ids: &[ComponentTypeId],
        mut spawn_column: impl FnMut(ComponentTypeId) -> Box<dyn Column>,
    ) -> ArchetypeId {
        let key = sorted_key(type_ids);
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }
        let id = self.archetypes.len() as ArchetypeId;
        let cols = key.iter().map(|&tid| (tid, spawn_column(tid))).collect();
        let archetype = Archetype::new(id, key.clone(), cols);
        tracing::debug!(archetype_id = id, type_ids = ?key.as_slice(), "created archetype");
        self.archetypes.push(archetype);
        self.by_key.insert(key, id);
        id
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id as usize)
    }

    /// Two disjoint mutable borrows at once, for migrating a row between archetypes without
    /// reaching for a raw pointer. Panics if `a == b` (a migration always changes the type set,
    /// so the two ids are never equal in practice).
    pub fn get_pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "get_pair_mut requires two distinct archetypes");
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (left, right) = self.archetypes.split_at_mut(hi as usize);
        let lo_ref = &mut left[lo as usize];
        let hi_ref = &mut right[0];
        if a < b {
            (lo_ref, hi_ref)
        } else {
            (hi_ref, lo_ref)
        }
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// All archetypes whose type set is a superset of `required` and disjoint from `forbidden`,
    /// in ascending type-id-sequence order (spec 4.5's cross-frame stable ordering).
    pub fn match_archetypes(
        &self,
        required: &[ComponentTypeId],
        forbidden: &[ComponentTypeId],
    ) -> Vec<ArchetypeId> {
        let mut matches: Vec<ArchetypeId> = self
            .archetypes
            .iter()
            .filter(|a| {
                required.iter().all(|r| a.has_type(*r)) && !forbidden.iter().any(|f| a.has_type(*f))
            })
            .map(|a| a.id)
            .collect();
        matches.sort_by_key(|&id| self.archetypes[id as usize].type_ids.clone());
        matches
    }

    /// Drops archetypes with no entities and no outstanding handle to them. Only ever called at
    /// flush time; archetype ids already issued for still-populated archetypes stay stable.
    pub fn retain_nonempty(&mut self) {
        // Archetype ids double as `Vec` indices elsewhere (queries cache them per-frame), so
        // emptied archetypes are kept as empty placeholders rather than compacted away; their
        // storage footprint is already near-zero once cleared.
        for a in &mut self.archetypes {
            if a.is_empty() {
                a.clear_rows();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ArrayColumn;

    fn spawn_array(_tid: ComponentTypeId) -> Box<dyn Column> {
        Box::new(ArrayColumn::new())
    }

    #[test]
    fn insertion_order_independent_key() {
        let mut idx = ArchetypeIndex::new();
        let a = idx.get_or_create(&[1, 2, 3], spawn_array);
        let b = idx.get_or_create(&[3, 1, 2], spawn_array);
        assert_eq!(a, b);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn push_and_swap_remove_keep_invariants() {
        let mut idx = ArchetypeIndex::new();
        let id = idx.get_or_create(&[1], spawn_array);
        let archetype = idx.get_mut(id).unwrap();
        let e0 = Entity::from_bits(1 << crate::entity::INDEX_BITS | 0);
        let e1 = Entity::from_bits(1 << crate::entity::INDEX_BITS | 1);
        archetype.push(e0, 0, |_| Ok(())).unwrap();
        archetype.push(e1, 0, |_| Ok(())).unwrap();
        archetype.verify().unwrap();
        let removed = archetype.swap_remove(0).unwrap();
        assert_eq!(removed, e0);
        assert_eq!(archetype.row_of(e1), Some(0));
        archetype.verify().unwrap();
    }

    #[test]
    fn duplicate_insertion_fails() {
        let mut idx = ArchetypeIndex::new();
        let id = idx.get_or_create(&[1], spawn_array);
        let archetype = idx.get_mut(id).unwrap();
        let e0 = Entity::from_bits(1 << crate::entity::INDEX_BITS | 0);
        archetype.push(e0, 0, |_| Ok(())).unwrap();
        assert!(archetype.push(e0, 0, |_| Ok(())).is_err());
    }

    #[test]
    fn match_filters_required_and_forbidden() {
        let mut idx = ArchetypeIndex::new();
        let with_1_2 = idx.get_or_create(&[1, 2], spawn_array);
        let with_1_3 = idx.get_or_create(&[1, 3], spawn_array);
        let matches = idx.match_archetypes(&[1], &[3]);
        assert_eq!(matches, vec![with_1_2]);
        assert!(!matches.contains(&with_1_3));
    }
}
