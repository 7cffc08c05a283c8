//! Shared-memory-availability probe (spec 6's "environment flag").
//!
//! A single-process crate has no literal cross-process shared-memory segment to broker, so the
//! flag this probes is read as "can this process hand worker threads disjoint mutable slices of a
//! typed column without copying" — true whenever the `rayon` feature is compiled in, since that is
//! the only thing that can actually consume such slices (`src/dispatch.rs`). The probe is computed
//! once and cached, per spec 6's "cached after first probe", behind a `reset()` hook so tests can
//! force a fresh read.
use std::sync::OnceLock;

/// Lazily-probed, cached shared-memory-availability flag.
///
/// Backed by `std::sync::OnceLock` rather than a crate dependency: the teacher carries no
/// `once_cell`/`lazy_static` dependency anywhere in its manifest, and the stdlib cell covers the
/// single `bool` this needs.
#[derive(Debug, Default)]
pub struct SharedMemoryProbe {
    cached: OnceLock<bool>,
}

impl SharedMemoryProbe {
    pub fn new() -> Self {
        SharedMemoryProbe { cached: OnceLock::new() }
    }

    /// Returns the cached probe result, computing it on first call.
    pub fn probe(&self) -> bool {
        *self.cached.get_or_init(Self::detect)
    }

    /// Test hook: clears the cached result so the next `probe()` call recomputes it.
    pub fn reset(&mut self) {
        self.cached = OnceLock::new();
    }

    fn detect() -> bool {
        cfg!(feature = "rayon")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_result_is_cached_across_calls() {
        let probe = SharedMemoryProbe::new();
        assert_eq!(probe.probe(), probe.probe());
    }

    #[test]
    fn reset_forces_a_fresh_read() {
        let mut probe = SharedMemoryProbe::new();
        let first = probe.probe();
        probe.reset();
        assert_eq!(probe.probe(), first);
    }
}
