//! Epoch reclamation (component G): a thin wrapper over
//! `crossbeam_epoch`. Readers pin a guard for the duration of a public
//! operation; retired chain links are deferred through that guard so
//! that reclamation only runs once no pinned thread could still be
//! dereferencing them.
//!
//! The wrapper exists to centralize retirement bookkeeping (one call
//! site per component that ever unlinks a chain) rather than to
//! reimplement epoch tracking -- `crossbeam_epoch`'s own global epoch
//! advancement and garbage-bag draining is reused as-is.

use crossbeam_epoch::Guard;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::node::ChainLink;

/// Process-wide counter of retired (not yet necessarily freed) chain
/// links, surfaced only for diagnostics (`BwTree::len_hint` and tests);
/// never consulted for correctness.
pub(crate) static RETIRED_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Enter the current epoch. Every public `BwTree` operation calls this
/// once on entry; the returned guard's lifetime bounds every borrow
/// taken from the mapping table during the call.
#[inline]
pub(crate) fn pin() -> Guard {
    crossbeam_epoch::pin()
}

/// Retire an entire unlinked chain (a consolidated-away head, or a chain
/// detached by a completed split/merge) so every link in it is dropped
/// once no guard pinned before this call could still observe it.
///
/// A chain is a linked stack of `Box`-allocated links; `defer_destroy`
/// on just the head would only ever free that one link; the rest (down
/// to and including the base) would leak. This walks the chain once,
/// iteratively (not recursively -- a long chain must not blow the
/// stack), deferring each link individually before moving to the next.
///
/// # Safety
/// `head` must already be unreachable from the mapping table -- no
/// thread may be able to load a fresh reference to it after this call.
/// Walking it here to collect the links is sound because this thread's
/// own guard keeps the current epoch pinned, and nothing ever mutates a
/// chain again once it has been unlinked.
pub(crate) unsafe fn retire<'g, K, V>(
    head: crossbeam_epoch::Shared<'g, ChainLink<K, V>>,
    guard: &'g Guard,
) where
    K: 'static,
    V: 'static,
{
    let mut cur = head;
    while !cur.is_null() {
        let link = cur.deref();
        let next = if link.kind.is_base() {
            crossbeam_epoch::Shared::null()
        } else {
            link.next.load(Ordering::Acquire, guard)
        };
        RETIRED_COUNT.fetch_add(1, Ordering::Relaxed);
        guard.defer_destroy(cur);
        cur = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_yields_a_usable_guard() {
        let guard = pin();
        // A pinned guard can be dropped without panicking; that's the
        // whole contract this module leans on.
        drop(guard);
    }
}
