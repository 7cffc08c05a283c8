//! Chunk-parallel kernel dispatch (spec 4.9): fan a pure kernel function out over disjoint row
//! ranges of every archetype matching a query, committing change tracking only after every chunk
//! has run and been validated.
//!
//! Grounded on `examples/0x112233-legion/src/system.rs`'s `SubWorld`/`run_recursive` chunk
//! iteration and on `src/system.rs`'s `rayon::scope` wave fan-out here (same fan-out shape, one
//! level down: chunks within one system rather than systems within one wave). A kernel here
//! declares exactly one writable component type plus any number of read-only ones — the DESIGN.md
//! "single write component per kernel" simplification of the abstract `writes: [columnIndex,...]`
//! contract; a kernel that needs to touch two components is registered twice, chained over the
//! same chunked query.
use std::fmt::Debug;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::archetype::{Archetype, ArchetypeId};
use crate::column::{ArrayColumn, Column, FieldSlice, FieldSliceMut, TypedColumn};
use crate::entity::Entity;
use crate::error::{EcsError, EcsResult};
use crate::probe::SharedMemoryProbe;
use crate::query::{ChunkRange, ChunkedQuery, Query};
use crate::registry::ComponentTypeId;
use crate::value::{ComponentValues, DynComponent, Scalar};
use crate::world::World;

/// A registered kernel's declared access (spec 4.9's "write indices"/"read indices", narrowed to
/// a single write component — see module docs).
#[derive(Clone, Debug)]
pub struct KernelMetadata {
    pub name: String,
    pub writes: ComponentTypeId,
    pub reads: Vec<ComponentTypeId>,
}

impl KernelMetadata {
    pub fn new(name: impl Into<String>, writes: ComponentTypeId, reads: impl Into<Vec<ComponentTypeId>>) -> Self {
        KernelMetadata { name: name.into(), writes, reads: reads.into() }
    }
}

/// A pure `(chunk, params) -> written` function (spec 4.9: "may not call into the world"). Returns
/// the set of component types it actually wrote this chunk, validated by the dispatcher against
/// the kernel's registered `writes` before anything is committed.
pub type Kernel = Arc<dyn Fn(&mut KernelChunk, &ComponentValues) -> EcsResult<Vec<ComponentTypeId>> + Send + Sync>;

/// Global table of registered kernels (spec 4.9, 6: "kernel registration").
#[derive(Default)]
pub struct KernelRegistry {
    kernels: FxHashMap<String, (KernelMetadata, Kernel)>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        KernelRegistry::default()
    }

    pub fn register(&mut self, metadata: KernelMetadata, kernel: Kernel) -> EcsResult<()> {
        if self.kernels.contains_key(&metadata.name) {
            return Err(EcsError::Registration(format!("kernel '{}' already registered", metadata.name)));
        }
        tracing::debug!(kernel = %metadata.name, writes = metadata.writes, "registered kernel");
        self.kernels.insert(metadata.name.clone(), (metadata, kernel));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&(KernelMetadata, Kernel)> {
        self.kernels.get(name)
    }
}

/// One chunk's column payload, in one of two shapes depending on the write component's backing
/// (spec 4.9: "zero-copy column slice descriptors for typed columns and per-row cloned data for
/// array columns"). `Shared` hands the kernel direct mutable field slices; `RowCloned` hands it
/// owned boxed values it must write back through `write_component`, since an `ArrayColumn`'s rows
/// have no fixed byte layout to slice.
pub enum KernelChunk<'a> {
    Shared {
        entities: Vec<Entity>,
        write_type: ComponentTypeId,
        write_field: FxHashMap<String, FieldSliceMut<'a>>,
        read_fields: FxHashMap<ComponentTypeId, FxHashMap<String, FieldSlice<'a>>>,
        read_rows: FxHashMap<ComponentTypeId, Vec<Option<Box<dyn DynComponent>>>>,
    },
    RowCloned {
        entities: Vec<Entity>,
        write_type: ComponentTypeId,
        write_rows: Vec<Option<Box<dyn DynComponent>>>,
        read_rows: FxHashMap<ComponentTypeId, Vec<Option<Box<dyn DynComponent>>>>,
        read_values: FxHashMap<ComponentTypeId, Vec<ComponentValues>>,
    },
}

impl<'a> KernelChunk<'a> {
    pub fn entities(&self) -> &[Entity] {
        match self {
            KernelChunk::Shared { entities, .. } => entities,
            KernelChunk::RowCloned { entities, .. } => entities,
        }
    }

    pub fn len(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_type(&self) -> ComponentTypeId {
        match self {
            KernelChunk::Shared { write_type, .. } => *write_type,
            KernelChunk::RowCloned { write_type, .. } => *write_type,
        }
    }

    /// A named scalar field of a read-only schema component, at `row` within this chunk.
    pub fn read_scalar(&self, type_id: ComponentTypeId, field: &str, row: usize) -> Option<Scalar> {
        match self {
            KernelChunk::Shared { read_fields, .. } => read_fields.get(&type_id)?.get(field)?.get(row),
            KernelChunk::RowCloned { read_values, .. } => read_values.get(&type_id)?.get(row)?.get(field),
        }
    }

    /// A named scalar field of the write component, at `row` within this chunk (shared-memory
    /// path only; the row-cloned path has no fixed field layout to read back through).
    pub fn write_scalar(&self, field: &str, row: usize) -> Option<Scalar> {
        match self {
            KernelChunk::Shared { write_field, .. } => write_field.get(field)?.get(row),
            KernelChunk::RowCloned { .. } => None,
        }
    }

    pub fn set_write_scalar(&mut self, field: &str, row: usize, value: Scalar) {
        if let KernelChunk::Shared { write_field, .. } = self {
            if let Some(slice) = write_field.get_mut(field) {
                slice.set(row, value);
            }
        }
    }

    /// A read-only array-backed component, downcast to its concrete Rust type.
    pub fn read_component<T: 'static>(&self, type_id: ComponentTypeId, row: usize) -> Option<&T> {
        let rows = match self {
            KernelChunk::Shared { read_rows, .. } => read_rows.get(&type_id)?,
            KernelChunk::RowCloned { read_rows, .. } => read_rows.get(&type_id)?,
        };
        rows.get(row)?.as_ref()?.downcast_ref::<T>()
    }

    /// Overwrites the write component at `row` (row-cloned path only); the dispatcher writes the
    /// replaced value back into the archetype's `ArrayColumn` after the chunk completes.
    pub fn write_component<T: 'static + Clone + Debug + Send + Sync>(&mut self, row: usize, value: T) {
        if let KernelChunk::RowCloned { write_rows, .. } = self {
            if let Some(slot) = write_rows.get_mut(row) {
                *slot = Some(Box::new(value));
            }
        }
    }
}

/// Summary of one `for_each_chunk_parallel` invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchReport {
    pub chunks_run: usize,
    pub entities_touched: usize,
}

/// Runs kernels over chunked queries against one `World` (spec 4.9).
pub struct ChunkDispatcher<'w> {
    world: &'w mut World,
    shared_memory_available: bool,
}

impl<'w> ChunkDispatcher<'w> {
    /// `shared_memory_available` mirrors spec 6's "environment flag": true fans chunks out across
    /// a `rayon::scope` (the in-process stand-in for a real shared-memory worker pool); false
    /// runs every chunk inline on the calling thread with the same kernel and payload shape (spec
    /// 4.9 step 3, "run the host kernel inline on each chunk's data") — there is no second,
    /// differently-shaped "host kernel" registration in a single-address-space crate.
    pub fn new(world: &'w mut World, shared_memory_available: bool) -> Self {
        ChunkDispatcher { world, shared_memory_available }
    }

    /// Convenience constructor that reads the environment flag from a cached
    /// `SharedMemoryProbe` instead of a caller-supplied bool.
    pub fn with_probe(world: &'w mut World, probe: &SharedMemoryProbe) -> Self {
        ChunkDispatcher { world, shared_memory_available: probe.probe() }
    }

    pub fn for_each_chunk_parallel(
        &mut self,
        registry: &KernelRegistry,
        kernel_name: &str,
        params: &ComponentValues,
        chunk_size: usize,
    ) -> EcsResult<DispatchReport> {
        let (metadata, kernel) = registry
            .get(kernel_name)
            .cloned()
            .ok_or_else(|| EcsError::Registration(format!("no kernel registered for '{}'", kernel_name)))?;

        let mut required = vec![metadata.writes];
        required.extend(metadata.reads.iter().copied());
        let chunk_size = chunk_size.max(1);
        let ranges = ChunkedQuery::new(Query::new(required), chunk_size).chunks(self.world.archetypes());
        validate_no_overlap(&ranges)?;

        let mut by_archetype: FxHashMap<ArchetypeId, Vec<ChunkRange>> = FxHashMap::default();
        for &r in &ranges {
            by_archetype.entry(r.archetype_id).or_default().push(r);
        }

        // Phase 1: run every chunk and collect its reported `written` set plus any row-cloned
        // payload to commit. Nothing is applied to the archetype's change-tracking state yet.
        let mut pending: Vec<(ArchetypeId, ChunkRange, Vec<ComponentTypeId>, Option<Vec<Option<Box<dyn DynComponent>>>>)> =
            Vec::with_capacity(ranges.len());

        for (&archetype_id, archetype_ranges) in by_archetype.iter() {
            let archetype = self
                .world
                .archetypes_mut()
                .get_mut(archetype_id)
                .ok_or_else(|| EcsError::Invariant("archetype vanished mid-dispatch".into()))?;
            let mut kernel_chunks = build_kernel_chunks(archetype, &metadata, chunk_size)?;
            let mut results: Vec<Option<EcsResult<Vec<ComponentTypeId>>>> =
                (0..kernel_chunks.len()).map(|_| None).collect();

            if self.shared_memory_available {
                rayon::scope(|scope| {
                    for (chunk, slot) in kernel_chunks.iter_mut().zip(results.iter_mut()) {
                        let kernel = &kernel;
                        scope.spawn(move |_| {
                            *slot = Some(kernel(chunk, params));
                        });
                    }
                });
            } else {
                for (chunk, slot) in kernel_chunks.iter_mut().zip(results.iter_mut()) {
                    *slot = Some(kernel(chunk, params));
                }
            }

            let commits: Vec<Option<Vec<Option<Box<dyn DynComponent>>>>> = kernel_chunks
                .iter_mut()
                .map(|chunk| match chunk {
                    KernelChunk::Shared { .. } => None,
                    KernelChunk::RowCloned { write_rows, .. } => Some(std::mem::take(write_rows)),
                })
                .collect();
            drop(kernel_chunks); // release the archetype borrow before the next archetype's turn

            for ((range, result), commit) in archetype_ranges.iter().zip(results.into_iter()).zip(commits.into_iter()) {
                let written = result.expect("every chunk yields exactly one result")?;
                pending.push((archetype_id, *range, written, commit));
            }
        }

        // Phase 2: validate every chunk's reported `written` before any commit (spec invariant
        // 10, "no change-tracking bit is committed for affected entities" on a contract mismatch).
        for (_, _, written, _) in &pending {
            for &tid in written {
                if tid != metadata.writes {
                    return Err(EcsError::KernelContract(format!(
                        "kernel '{}' reported writing type {} but only declared write type {}",
                        metadata.name, tid, metadata.writes
                    )));
                }
            }
        }

        // Phase 3: commit. Row-cloned payloads are written back into their `ArrayColumn`; typed
        // writes were already applied in place through the field slices, so only their change
        // tracking needs marking.
        let frame = self.world.frame();
        let mut entities_touched = 0usize;
        for (archetype_id, range, written, commit) in pending {
            if written.is_empty() {
                continue;
            }
            entities_touched += range.len();
            let archetype = self
                .world
                .archetypes_mut()
                .get_mut(archetype_id)
                .ok_or_else(|| EcsError::Invariant("archetype vanished mid-dispatch".into()))?;
            if let Some(rows) = commit {
                if let Some(arr) = archetype.column_mut(metadata.writes).and_then(|c| c.as_any_mut().downcast_mut::<ArrayColumn>()) {
                    arr.write_rows_back(range.start_row, rows, frame);
                }
            } else if let Some(col) = archetype.column_mut(metadata.writes) {
                col.mark_written_range(range.start_row, range.end_row, frame);
            }
        }

        Ok(DispatchReport { chunks_run: ranges.len(), entities_touched })
    }
}

/// No two chunks in the result set may address overlapping rows of the same archetype (spec
/// 4.9's race-prevention contract). `ChunkedQuery::chunks` generates disjoint ranges by
/// construction, so this should never trip; it exists as the explicit guard the spec calls for
/// rather than an implicit assumption.
fn validate_no_overlap(ranges: &[ChunkRange]) -> EcsResult<()> {
    let mut seen: Vec<(ArchetypeId, usize, usize)> = Vec::with_capacity(ranges.len());
    for r in ranges {
        for &(aid, s, e) in &seen {
            if aid == r.archetype_id && s < r.end_row && r.start_row < e {
                return Err(EcsError::ConcurrencySafety(format!(
                    "overlapping chunks in archetype {}: [{}, {}) and [{}, {})",
                    aid, s, e, r.start_row, r.end_row
                )));
            }
        }
        seen.push((r.archetype_id, r.start_row, r.end_row));
    }
    Ok(())
}

/// Builds one `KernelChunk` per row range of `archetype`, borrowing its write and read columns
/// for the lifetime of the returned `Vec` (spec 4.9's payload-building step).
fn build_kernel_chunks<'a>(
    archetype: &'a mut Archetype,
    metadata: &KernelMetadata,
    chunk_size: usize,
) -> EcsResult<Vec<KernelChunk<'a>>> {
    let entities = archetype.entities().to_vec();
    let len = entities.len();
    if len == 0 {
        return Ok(Vec::new());
    }
    let entity_chunks: Vec<Vec<Entity>> = entities.chunks(chunk_size).map(|s| s.to_vec()).collect();
    let n_chunks = entity_chunks.len();
    let mut row_ranges = Vec::with_capacity(n_chunks);
    let mut start = 0;
    for _ in 0..n_chunks {
        let end = (start + chunk_size).min(len);
        row_ranges.push((start, end));
        start = end;
    }

    let mut required = vec![metadata.writes];
    required.extend(metadata.reads.iter().copied());
    let mut cols = archetype.columns_mut(&required);

    let write_col = cols.remove(&metadata.writes).ok_or_else(|| {
        EcsError::ConcurrencySafety(format!("archetype is missing declared write column {}", metadata.writes))
    })?;
    let write_type = metadata.writes;
    let write_is_typed = write_col.as_any().is::<TypedColumn>();

    let mut read_row_chunks: FxHashMap<ComponentTypeId, Vec<Vec<Option<Box<dyn DynComponent>>>>> = FxHashMap::default();
    let mut read_field_chunks: FxHashMap<ComponentTypeId, Vec<FxHashMap<String, FieldSlice<'a>>>> = FxHashMap::default();
    let mut read_value_chunks: FxHashMap<ComponentTypeId, Vec<Vec<ComponentValues>>> = FxHashMap::default();

    for (tid, col) in cols.into_iter() {
        if let Some(arr) = col.as_any().downcast_ref::<ArrayColumn>() {
            let chunks = row_ranges.iter().map(|&(s, e)| arr.clone_rows(s, e)).collect();
            read_row_chunks.insert(tid, chunks);
        } else if col.as_any().downcast_ref::<TypedColumn>().is_some() {
            if write_is_typed {
                let typed = col.as_any().downcast_ref::<TypedColumn>().expect("just matched");
                read_field_chunks.insert(tid, typed.schema_field_chunks(chunk_size));
            } else {
                let chunks: Vec<Vec<ComponentValues>> = row_ranges
                    .iter()
                    .map(|&(s, e)| {
                        (s..e)
                            .map(|row| {
                                let mut out = ComponentValues::new();
                                col.read_to_object(row, &mut out);
                                out
                            })
                            .collect()
                    })
                    .collect();
                read_value_chunks.insert(tid, chunks);
            }
        }
    }

    if write_is_typed {
        let write_typed = write_col.as_any_mut().downcast_mut::<TypedColumn>().expect("checked above");
        let write_field_chunks = write_typed.schema_field_chunks_mut(chunk_size);
        let mut write_field_iter = write_field_chunks.into_iter();
        let mut read_field_iters: Vec<_> = read_field_chunks.into_iter().map(|(t, v)| (t, v.into_iter())).collect();
        let mut read_row_iters: Vec<_> = read_row_chunks.into_iter().map(|(t, v)| (t, v.into_iter())).collect();

        let mut out = Vec::with_capacity(n_chunks);
        for ents in entity_chunks {
            let write_field = write_field_iter.next().unwrap_or_default();
            let mut read_fields = FxHashMap::default();
            for (tid, it) in read_field_iters.iter_mut() {
                read_fields.insert(*tid, it.next().unwrap_or_default());
            }
            let mut read_rows = FxHashMap::default();
            for (tid, it) in read_row_iters.iter_mut() {
                read_rows.insert(*tid, it.next().unwrap_or_default());
            }
            out.push(KernelChunk::Shared { entities: ents, write_type, write_field, read_fields, read_rows });
        }
        Ok(out)
    } else {
        let write_arr = write_col.as_any_mut().downcast_mut::<ArrayColumn>().ok_or_else(|| {
            EcsError::ConcurrencySafety(format!("write column {} is neither typed nor array-backed", write_type))
        })?;
        let mut write_row_chunks: Vec<Vec<Option<Box<dyn DynComponent>>>> =
            row_ranges.iter().map(|&(s, e)| write_arr.clone_rows(s, e)).collect();
        write_row_chunks.reverse();
        let mut read_row_iters: Vec<_> = read_row_chunks.into_iter().map(|(t, v)| (t, v.into_iter())).collect();
        let mut read_value_iters: Vec<_> = read_value_chunks.into_iter().map(|(t, v)| (t, v.into_iter())).collect();

        let mut out = Vec::with_capacity(n_chunks);
        for ents in entity_chunks {
            let write_rows = write_row_chunks.pop().unwrap_or_default();
            let mut read_rows = FxHashMap::default();
            for (tid, it) in read_row_iters.iter_mut() {
                read_rows.insert(*tid, it.next().unwrap_or_default());
            }
            let mut read_values = FxHashMap::default();
            for (tid, it) in read_value_iters.iter_mut() {
                read_values.insert(*tid, it.next().unwrap_or_default());
            }
            out.push(KernelChunk::RowCloned { entities: ents, write_type, write_rows, read_rows, read_values });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Schema, ScalarKind};

    struct Marker;

    fn spawn_world_with_positions(n: usize) -> (World, ComponentTypeId, Vec<Entity>) {
        let mut world = World::new();
        let position = world
            .register_component_with_schema::<Marker>("Position", Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]))
            .unwrap();
        let mut entities = Vec::with_capacity(n);
        for i in 0..n {
            let e = world.create_entity(true);
            world.flush();
            let values = ComponentValues::new().with("x", Scalar::F32(i as f32)).with("y", Scalar::F32(0.0));
            world.add_component(e, position, values);
            entities.push(e);
        }
        world.flush();
        (world, position, entities)
    }

    fn move_kernel() -> Kernel {
        Arc::new(|chunk: &mut KernelChunk, _params: &ComponentValues| {
            for row in 0..chunk.len() {
                if let Some(Scalar::F32(x)) = chunk.write_scalar("x", row) {
                    chunk.set_write_scalar("x", row, Scalar::F32(x + 1.0));
                }
            }
            Ok(vec![chunk.write_type()])
        })
    }

    #[test]
    fn shared_path_advances_every_entity_across_chunk_boundaries() {
        let (mut world, position, entities) = spawn_world_with_positions(5);
        let mut registry = KernelRegistry::new();
        registry.register(KernelMetadata::new("move_x", position, vec![]), move_kernel()).unwrap();

        let mut dispatcher = ChunkDispatcher::new(&mut world, true);
        let report = dispatcher
            .for_each_chunk_parallel(&registry, "move_x", &ComponentValues::new(), 2)
            .unwrap();
        assert_eq!(report.chunks_run, 3);
        assert_eq!(report.entities_touched, 5);

        for (i, &e) in entities.iter().enumerate() {
            let snapshot = world.get_component(e, position).unwrap();
            assert_eq!(snapshot.get("x"), Some(Scalar::F32(i as f32 + 1.0)));
        }
    }

    #[test]
    fn kernel_contract_violation_is_rejected_before_commit() {
        let (mut world, position, entities) = spawn_world_with_positions(3);
        let mut registry = KernelRegistry::new();
        let bogus_kernel: Kernel = Arc::new(|_chunk: &mut KernelChunk, _params| Ok(vec![999]));
        registry.register(KernelMetadata::new("bogus", position, vec![]), bogus_kernel).unwrap();

        let mut dispatcher = ChunkDispatcher::new(&mut world, true);
        let err = dispatcher
            .for_each_chunk_parallel(&registry, "bogus", &ComponentValues::new(), 10)
            .unwrap_err();
        assert!(matches!(err, EcsError::KernelContract(_)));

        for (i, &e) in entities.iter().enumerate() {
            let snapshot = world.get_component(e, position).unwrap();
            assert_eq!(snapshot.get("x"), Some(Scalar::F32(i as f32)));
        }
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let ranges = vec![
            ChunkRange { archetype_id: 0, start_row: 0, end_row: 5 },
            ChunkRange { archetype_id: 0, start_row: 3, end_row: 8 },
        ];
        assert!(validate_no_overlap(&ranges).is_err());
    }

    #[test]
    fn with_probe_reads_the_shared_memory_probe() {
        let (mut world, position, entities) = spawn_world_with_positions(2);
        let mut registry = KernelRegistry::new();
        registry.register(KernelMetadata::new("move_x", position, vec![]), move_kernel()).unwrap();

        let probe = SharedMemoryProbe::new();
        let mut dispatcher = ChunkDispatcher::with_probe(&mut world, &probe);
        let report = dispatcher.for_each_chunk_parallel(&registry, "move_x", &ComponentValues::new(), 2).unwrap();
        assert_eq!(report.entities_touched, entities.len());
    }
}
