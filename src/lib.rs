//! `strata_ecs`: a deterministic, data-oriented entity-component-system runtime with
//! conflict-aware parallel scheduling.
//!
//! The crate is organized the way the teacher this was grown from (`legion` 0.2.4) organizes
//! itself — one module per subsystem, a thin `lib.rs` that wires them together and re-exports a
//! flat prelude — but every subsystem's *contents* implement this crate's own dynamic,
//! schema-driven component model rather than legion's static generic one. See `DESIGN.md` for the
//! module-by-module grounding ledger.
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let position = world
//!     .register_component_with_schema::<()>(
//!         "Position",
//!         Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]),
//!     )
//!     .unwrap();
//! let e = world.create_entity(true);
//! world.flush();
//! world.add_component(e, position, ComponentValues::new().with("x", Scalar::F32(1.0)));
//! world.flush();
//! assert!(world.has_component(e, position));
//! ```
mod archetype;
mod column;
mod command;
mod dispatch;
mod entity;
mod error;
mod event;
mod fixed;
mod hash;
mod prng;
mod probe;
mod query;
mod registry;
mod resource;
mod runner;
#[cfg(feature = "serialize")]
mod serialize;
mod system;
mod value;
mod world;

pub use archetype::{Archetype, ArchetypeId, ArchetypeIndex, TypeIdSet};
pub use column::{ArrayColumn, Column, TypedColumn};
pub use command::CommandBuffer;
pub use dispatch::{ChunkDispatcher, DispatchReport, Kernel, KernelChunk, KernelMetadata, KernelRegistry};
pub use entity::{Entity, EntityAllocator, Universe};
pub use error::{EcsError, EcsResult};
pub use event::{ComponentEvent, ComponentEventKind, EventChannel};
pub use fixed::Fixed32;
pub use hash::{hash_world, StateHasher};
pub use prng::{next_guid, GuidAllocator, Xorshift128PlusPrng, DEFAULT_GUID_SEED};
pub use probe::SharedMemoryProbe;
pub use query::{ChunkRange, ChunkView, ChunkedQuery, Query, DEFAULT_CHUNK_SIZE};
pub use registry::{ComponentRegistry, ComponentTypeId, ScalarKind, Schema};
pub use resource::{Read, Resource, Resources, Write};
pub use runner::{
    CancellationToken, ExecutionResult, ParallelRunner, RunToken, RunnerConfig, SystemExecutor, SystemOutcome,
};
#[cfg(feature = "serialize")]
pub use serialize::{from_json, snapshot_world, to_json, to_json_value, EntityRecord, SaveRecord, CURRENT_VERSION};
pub use system::{AccessMode, SystemHandle, SystemMetadata, WavePlan, WavePlanner};
pub use value::{ComponentValues, DynComponent, Scalar};
pub use world::World;

/// Glob-importable re-export of the crate's day-to-day surface, mirroring the teacher's own
/// flat top-level API (`use legion::*`) so call sites don't have to name each module.
pub mod prelude {
    pub use crate::{
        Archetype, ArchetypeId, ArrayColumn, CancellationToken, ChunkDispatcher, ChunkRange, ChunkedQuery,
        Column, CommandBuffer, ComponentEvent, ComponentRegistry, ComponentTypeId, ComponentValues,
        DispatchReport, EcsError, EcsResult, Entity, EventChannel, ExecutionResult, Fixed32, GuidAllocator,
        Kernel, KernelChunk, KernelMetadata, KernelRegistry, ParallelRunner, Query, Read, Resources, RunToken,
        RunnerConfig, Scalar, ScalarKind, Schema, SharedMemoryProbe, StateHasher, SystemExecutor, SystemHandle,
        SystemMetadata, TypedColumn, Universe, WavePlan, WavePlanner, World, Write, Xorshift128PlusPrng,
    };
    #[cfg(feature = "serialize")]
    pub use crate::{SaveRecord, CURRENT_VERSION};
}
