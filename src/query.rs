//! Dynamic, `typeId`-list queries and chunked queries over archetype storage (spec 4.5).
//!
//! Grounded on `examples/0x112233-legion/src/query.rs` (`Query`, `ChunkView`,
//! `into_chunks`/`into_data` iterator-adaptor style, "chunks never cross archetype boundaries");
//! re-targeted from legion's compile-time `View`/tuple-macro generics (`Read<T>`, `Write<T>`,
//! `(R1, R2, ...)` tuples over concrete Rust types) to this crate's dynamic `typeId`-list queries,
//! since component access here is schema/value based rather than one static Rust type per column.
use crate::archetype::{Archetype, ArchetypeId, ArchetypeIndex};
use crate::entity::Entity;
use crate::registry::ComponentTypeId;

/// Target row-range size for `ChunkedQuery` iteration (spec 4.9's `targetChunkSize`); archetypes
/// smaller than this yield a single chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// A required/forbidden `typeId` filter over the archetype index (spec 4.5).
#[derive(Clone, Debug, Default)]
pub struct Query {
    required: Vec<ComponentTypeId>,
    forbidden: Vec<ComponentTypeId>,
}

impl Query {
    pub fn new(required: impl Into<Vec<ComponentTypeId>>) -> Self {
        Query { required: required.into(), forbidden: Vec::new() }
    }

    pub fn with_forbidden(mut self, forbidden: impl Into<Vec<ComponentTypeId>>) -> Self {
        self.forbidden = forbidden.into();
        self
    }

    pub fn required(&self) -> &[ComponentTypeId] {
        &self.required
    }

    pub fn forbidden(&self) -> &[ComponentTypeId] {
        &self.forbidden
    }

    /// Archetypes matched by this filter, in the stable cross-frame ordering (sorted by
    /// archetype type-id sequence; spec 4.5).
    pub fn matching_archetypes<'a>(&self, index: &'a ArchetypeIndex) -> Vec<&'a Archetype> {
        index
            .match_archetypes(&self.required, &self.forbidden)
            .into_iter()
            .filter_map(|id| index.get(id))
            .collect()
    }

    /// Yields `(entity, archetype)` pairs across every matching archetype, archetype-then-
    /// insertion order (spec 4.5).
    pub fn iter<'a>(&self, index: &'a ArchetypeIndex) -> impl Iterator<Item = (Entity, &'a Archetype)> {
        self.matching_archetypes(index)
            .into_iter()
            .flat_map(|a| a.entities().iter().copied().map(move |e| (e, a)))
    }

    pub fn into_chunked(self, chunk_size: usize) -> ChunkedQuery {
        ChunkedQuery::new(self, chunk_size)
    }
}

/// Same archetype filter as `Query`, but iterates fixed-size row ranges instead of per-entity
/// (spec 4.5, 4.9): each `ChunkView` is a disjoint, contiguous slice of one archetype's rows,
/// suitable for direct vectorized processing or handing to a chunk-parallel worker.
#[derive(Clone, Debug)]
pub struct ChunkedQuery {
    query: Query,
    chunk_size: usize,
}

impl ChunkedQuery {
    pub fn new(query: Query, chunk_size: usize) -> Self {
        ChunkedQuery { query, chunk_size: chunk_size.max(1) }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Row-range descriptors for every chunk of every matching archetype, in the same stable
    /// archetype ordering as `Query::iter`. Chunks never cross archetype boundaries (spec 4.5):
    /// the last chunk of an archetype is simply shorter than `chunk_size` when `len` doesn't
    /// divide evenly.
    pub fn chunks(&self, index: &ArchetypeIndex) -> Vec<ChunkRange> {
        let mut out = Vec::new();
        for archetype_id in index.match_archetypes(self.query.required(), self.query.forbidden()) {
            let Some(archetype) = index.get(archetype_id) else { continue };
            let len = archetype.len();
            let mut start = 0;
            while start < len {
                let end = (start + self.chunk_size).min(len);
                out.push(ChunkRange { archetype_id, start_row: start, end_row: end });
                start = end;
            }
        }
        out
    }
}

/// One chunk's coordinates: which archetype, and which contiguous row range within it.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ChunkRange {
    pub archetype_id: ArchetypeId,
    pub start_row: usize,
    pub end_row: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn is_empty(&self) -> bool {
        self.end_row == self.start_row
    }

    /// Materializes this range into a `ChunkView` borrowed from `index`.
    pub fn view<'a>(&self, index: &'a ArchetypeIndex) -> Option<ChunkView<'a>> {
        let archetype = index.get(self.archetype_id)?;
        Some(ChunkView { archetype, start_row: self.start_row, end_row: self.end_row })
    }
}

/// A materialized view over one chunk: the entity slice plus the owning archetype, from which
/// callers slice individual columns by `typeId` (`rawCols` in spec 4.5 — kept as the owning
/// `Archetype`/`Column` reference rather than a separate sliced-tuple type, since column access
/// here is dynamic by `typeId` rather than compile-time-typed).
pub struct ChunkView<'a> {
    pub archetype: &'a Archetype,
    pub start_row: usize,
    pub end_row: usize,
}

impl<'a> ChunkView<'a> {
    pub fn entities(&self) -> &'a [Entity] {
        &self.archetype.entities()[self.start_row..self.end_row]
    }

    pub fn len(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn is_empty(&self) -> bool {
        self.start_row == self.end_row
    }

    pub fn column(&self, type_id: ComponentTypeId) -> Option<&'a dyn crate::column::Column> {
        self.archetype.column(type_id)
    }
}
