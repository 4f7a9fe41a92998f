//! Mapping table (component A): the indirection from `NodeId` to the
//! current chain-head pointer, the only place a structural modification
//! or consolidation is ever published — always via a single CAS.
//!
//! Grounded in a segmented directory (array-of-segments) so that growth
//! never relocates an already-published slot: `install`/`get` only ever
//! need to resolve which segment a `NodeId` falls into, then index a
//! fixed-size array inside it.

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::node::{ChainLink, NodeId};

pub(crate) const SEGMENT_LEN: usize = 4096;

pub(crate) struct Segment<K, V> {
    slots: Vec<Atomic<ChainLink<K, V>>>,
}

impl<K, V> Segment<K, V> {
    fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, Atomic::null);
        Segment { slots }
    }
}

/// Two-level indirection: a directory of segments, grown by appending
/// new segments under a write lock. Readers take only a (cheap, usually
/// uncontended) read lock to clone the `Arc<Segment>` they need, then
/// drop the lock before touching any atomic slot.
pub(crate) struct MappingTable<K, V> {
    directory: RwLock<Vec<Arc<Segment<K, V>>>>,
    next_id: AtomicU64,
}

impl<K, V> MappingTable<K, V> {
    pub(crate) fn new() -> Self {
        MappingTable {
            directory: RwLock::new(vec![Arc::new(Segment::new(SEGMENT_LEN))]),
            next_id: AtomicU64::new(0),
        }
    }

    /// Monotonic id allocation. Pre-registers an empty (null) slot
    /// before returning so that `install` always observes a
    /// well-defined initial sentinel -- allocation and slot
    /// registration must never be separated (see DESIGN.md).
    pub(crate) fn allocate_id(&self) -> NodeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ensure_capacity(id);
        NodeId(id)
    }

    fn ensure_capacity(&self, id: u64) {
        let needed_segments = (id as usize) / SEGMENT_LEN + 1;
        {
            let dir = self.directory.read();
            if dir.len() >= needed_segments {
                return;
            }
        }
        let mut dir = self.directory.write();
        while dir.len() < needed_segments {
            dir.push(Arc::new(Segment::new(SEGMENT_LEN)));
            log::trace!(target: "bwtree::mapping_table", "grew directory to {} segments", dir.len());
        }
    }

    fn segment_for(&self, id: NodeId) -> Arc<Segment<K, V>> {
        let idx = id.index() as usize / SEGMENT_LEN;
        let dir = self.directory.read();
        dir[idx].clone()
    }

    /// Atomic load of the current chain head.
    pub(crate) fn get<'g>(&self, id: NodeId, guard: &'g Guard) -> Shared<'g, ChainLink<K, V>> {
        let seg = self.segment_for(id);
        let slot = id.index() as usize % SEGMENT_LEN;
        seg.slots[slot].load(Ordering::Acquire, guard)
    }

    /// CAS the slot from `expected` to `new`. On failure the `Owned` is
    /// handed back so the caller can reuse or drop it without leaking.
    pub(crate) fn install<'g>(
        &self,
        id: NodeId,
        expected: Shared<'g, ChainLink<K, V>>,
        new: Owned<ChainLink<K, V>>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, ChainLink<K, V>>, Owned<ChainLink<K, V>>> {
        let seg = self.segment_for(id);
        let slot = id.index() as usize % SEGMENT_LEN;
        seg.slots[slot]
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire, guard)
            .map_err(|CompareExchangeError { new, .. }| new)
    }

    /// Publish a brand-new id/slot in one step (used only for the very
    /// first install of a freshly allocated node, where CAS-from-null
    /// cannot race with a concurrent writer because the id has not been
    /// handed to any other thread yet).
    pub(crate) fn publish(&self, id: NodeId, new: Owned<ChainLink<K, V>>, guard: &Guard) {
        let seg = self.segment_for(id);
        let slot = id.index() as usize % SEGMENT_LEN;
        let prev = seg.slots[slot].swap(new, Ordering::Release, guard);
        debug_assert!(prev.is_null(), "publish() used on an already-installed slot");
    }
}
