//! Entity handles and the block allocator that hands them out.
//!
//! Grounded on `examples/0x112233-legion/src/lib.rs` (`Entity`, `BlockAllocator`, `EntityBlock`,
//! `EntityAllocator`, `Universe`): kept the block-allocation strategy (fixed-size blocks, a free
//! list per block, generation bump on free) and generalized legion's separate index/version pair
//! into the spec's packed 32-bit `(index, generation)` handle.
use std::fmt;

/// Bits reserved for the entity index; the remaining 8 bits are the generation counter.
pub const INDEX_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const BLOCK_SIZE: usize = 1024;

/// Opaque 32-bit `(index, generation)` handle (spec 3). `Entity::NULL` (bit pattern `0`) never
/// aliases a live entity because freshly allocated slots always start at generation `1`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Entity(u32);

impl Entity {
    pub const NULL: Entity = Entity(0);

    fn pack(index: u32, generation: u8) -> Entity {
        debug_assert!(index <= INDEX_MASK, "entity index {} exceeds {} bits", index, INDEX_BITS);
        Entity(((generation as u32) << INDEX_BITS) | (index & INDEX_MASK))
    }

    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    pub fn generation(self) -> u8 {
        (self.0 >> INDEX_BITS) as u8
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Entity {
        Entity(bits)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}#{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index(), self.generation())
    }
}

fn bump_generation(g: u8) -> u8 {
    let next = g.wrapping_add(1);
    if next == 0 {
        1
    } else {
        next
    }
}

#[derive(Debug)]
struct EntityBlock {
    start: u32,
    len: usize,
    generations: Vec<u8>,
    free: Vec<u32>,
}

impl EntityBlock {
    fn new(start: u32, len: usize) -> Self {
        EntityBlock { start, len, generations: Vec::new(), free: Vec::new() }
    }

    fn local(&self, index: u32) -> usize {
        (index - self.start) as usize
    }

    fn is_alive(&self, entity: Entity) -> Option<bool> {
        if entity.index() < self.start {
            return None;
        }
        let i = self.local(entity.index());
        self.generations.get(i).map(|g| *g == entity.generation())
    }

    fn allocate(&mut self) -> Option<Entity> {
        if let Some(index) = self.free.pop() {
            let i = self.local(index);
            Some(Entity::pack(index, self.generations[i]))
        } else if self.generations.len() < self.len {
            let index = self.start + self.generations.len() as u32;
            self.generations.push(1);
            Some(Entity::pack(index, 1))
        } else {
            None
        }
    }

    /// Returns `Some(true)` if the entity was alive and is now freed, `Some(false)` if the slot
    /// exists but the handle is stale, `None` if the index does not belong to this block.
    fn free(&mut self, entity: Entity) -> Option<bool> {
        if entity.index() < self.start {
            return None;
        }
        let i = self.local(entity.index());
        let g = *self.generations.get(i)?;
        if g != entity.generation() {
            return Some(false);
        }
        self.generations[i] = bump_generation(g);
        self.free.push(entity.index());
        Some(true)
    }
}

/// Per-world entity handle allocator. Hands out handles from growing fixed-size blocks so that
/// reused slots always carry a higher generation than any previously issued handle for that slot.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    blocks: Vec<EntityBlock>,
    next_start: u32,
}

impl EntityAllocator {
    pub fn new() -> Self {
        EntityAllocator { blocks: Vec::new(), next_start: 0 }
    }

    pub fn create(&mut self) -> Entity {
        for block in self.blocks.iter_mut().rev() {
            if let Some(e) = block.allocate() {
                return e;
            }
        }
        let mut block = EntityBlock::new(self.next_start, BLOCK_SIZE);
        self.next_start += BLOCK_SIZE as u32;
        let e = block.allocate().expect("freshly created block has capacity");
        self.blocks.push(block);
        e
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        self.blocks.iter().find_map(|b| b.is_alive(entity)).unwrap_or(false)
    }

    /// Frees `entity` immediately; per spec 3 the *archetype row* removal this backs is deferred
    /// to the end-of-frame structural phase by the command buffer, not by this call.
    pub fn free(&mut self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        for block in self.blocks.iter_mut() {
            if let Some(alive) = block.free(entity) {
                return alive;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.generations.len() - b.free.len()).sum()
    }
}

/// Process-scoped owner that mints independent `World`s. Mirrors the teacher's `Universe` /
/// `World` split (spec 2.1); this implementation's `World` owns its own allocator and registries
/// directly, so `Universe` today is a thin, explicit construction point rather than a shared
/// resource — kept so call sites read the same way as the teacher's `Universe::new().create_world()`.
#[derive(Debug, Default)]
pub struct Universe;

impl Universe {
    pub fn new() -> Self {
        Universe
    }

    /// Mints a fresh, independent `World` (spec 2.1). Each `World` owns its own entity allocator
    /// and registries, so sibling worlds created from the same `Universe` never share state; the
    /// `Universe` exists only so call sites read the same way as the teacher's
    /// `Universe::new().create_world()`.
    pub fn create_world(&self) -> crate::world::World {
        crate::world::World::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_entity_is_alive() {
        let mut a = EntityAllocator::new();
        let e = a.create();
        assert!(a.is_alive(e));
        assert!(!e.is_null());
    }

    #[test]
    fn free_then_recreate_bumps_generation() {
        let mut a = EntityAllocator::new();
        let e = a.create();
        assert!(a.free(e));
        assert!(!a.is_alive(e));
        let e2 = a.create();
        assert_eq!(e.index(), e2.index());
        assert_ne!(e, e2);
        assert!(!a.is_alive(e));
        assert!(a.is_alive(e2));
    }

    #[test]
    fn free_of_dead_entity_is_false() {
        let mut a = EntityAllocator::new();
        let e = a.create();
        assert!(a.free(e));
        assert!(!a.free(e));
    }

    #[test]
    fn free_of_unallocated_entity_is_false() {
        let mut a = EntityAllocator::new();
        assert!(!a.free(Entity::from_bits(1 << INDEX_BITS)));
    }

    #[test]
    fn many_blocks_allocate_distinct_entities() {
        let mut a = EntityAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..(BLOCK_SIZE * 3 + 7) {
            let e = a.create();
            assert!(seen.insert(e));
        }
    }

    #[test]
    fn null_entity_is_never_alive() {
        let a = EntityAllocator::new();
        assert!(!a.is_alive(Entity::NULL));
    }
}
