//! Event channels: per-type FIFOs read by systems that declare a dependency on their producer
//! (spec 4, "Event channels -> SPSC/MPMC queues keyed by type").
use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// FIFO of arbitrary `T`. Backed by an unbounded `crossbeam_channel` pair rather than a `Vec`
/// behind a lock, so multiple systems within the same wave can `emit` concurrently without
/// contending on a single mutex (teacher dependency: `crossbeam-channel`, already used for the
/// wave executor's job/result protocol).
pub struct EventChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel").field("size", &self.size()).finish()
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventChannel<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        EventChannel { tx, rx }
    }

    pub fn emit(&self, value: T) {
        // The receiver is held by `self` too, so this only fails if disconnected, which never
        // happens while `self` is alive.
        let _ = self.tx.send(value);
    }

    /// Calls `f` on every pending event in arrival order, leaving the channel empty.
    pub fn drain(&self, mut f: impl FnMut(T)) {
        while let Ok(v) = self.rx.try_recv() {
            f(v);
        }
    }

    /// Removes and returns every pending event, in arrival order.
    pub fn take_all(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(v) = self.rx.try_recv() {
            out.push(v);
        }
        out
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn size(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Component-set-membership transition, emitted by the command buffer flush (spec 4.6) — never
/// on an in-place value replacement.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ComponentEventKind {
    Added,
    Removed,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ComponentEvent {
    pub entity: crate::entity::Entity,
    pub type_id: crate::registry::ComponentTypeId,
    pub kind: ComponentEventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_then_take_all_preserves_order() {
        let ch: EventChannel<i32> = EventChannel::new();
        ch.emit(1);
        ch.emit(2);
        ch.emit(3);
        assert_eq!(ch.take_all(), vec![1, 2, 3]);
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn drain_invokes_callback_and_empties() {
        let ch: EventChannel<&str> = EventChannel::new();
        ch.emit("a");
        ch.emit("b");
        let mut seen = Vec::new();
        ch.drain(|v| seen.push(v));
        assert_eq!(seen, vec!["a", "b"]);
        assert!(ch.is_empty());
    }

    #[test]
    fn clear_discards_pending_events() {
        let ch: EventChannel<i32> = EventChannel::new();
        ch.emit(1);
        ch.clear();
        assert_eq!(ch.size(), 0);
    }
}
