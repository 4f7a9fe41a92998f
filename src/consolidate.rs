//! Consolidation (component E): fold a delta chain over its base to
//! produce a dense replacement base node, then CAS it into the chain
//! head's slot.
//!
//! The same fold is reused by the read path (`search`) to interpret a
//! chain without publishing anything: materializing the effective
//! entries/separators once per operation is simpler to reason about
//! than a "first delta that mentions this key wins" short-circuit, and
//! chain length is bounded by `max_chain_len` (default 8) so the cost
//! difference is negligible at the tree's default thresholds.

use crossbeam_epoch::{Guard, Owned, Shared};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::atomic::Ordering as AtomicOrdering;

use crate::epoch;
use crate::mapping_table::MappingTable;
use crate::node::{ChainLink, InternalBase, LeafBase, LinkKind, MergedSnapshot, NodeId, Range};
use crate::tree::{KeyComparator, ValueComparator};

/// A chain decomposed into its (newest-first) deltas and its base.
pub(crate) struct ChainView<'g, K, V> {
    pub(crate) deltas: SmallVec<[&'g LinkKind<K, V>; 16]>,
    pub(crate) base: &'g ChainLink<K, V>,
    pub(crate) chain_len: u32,
    pub(crate) head: Shared<'g, ChainLink<K, V>>,
}

/// Walk a chain from `head` down to its base, collecting references to
/// every delta along the way. `head` must not be null.
pub(crate) fn walk_chain<'g, K, V>(head: Shared<'g, ChainLink<K, V>>, guard: &'g Guard) -> ChainView<'g, K, V> {
    debug_assert!(!head.is_null(), "walk_chain called on an unpublished slot");
    let head_link = unsafe { head.deref() };
    let chain_len = head_link.chain_len;
    let mut deltas: SmallVec<[&'g LinkKind<K, V>; 16]> = SmallVec::new();
    let mut cur = head;
    loop {
        let link = unsafe { cur.deref() };
        if link.kind.is_base() {
            return ChainView {
                deltas,
                base: link,
                chain_len,
                head,
            };
        }
        deltas.push(&link.kind);
        cur = link.next.load(AtomicOrdering::Acquire, guard);
        debug_assert!(!cur.is_null(), "delta chain ended without reaching a base");
    }
}

/// Fold a leaf chain view into an owned `LeafBase`, applying deltas in
/// bottom-to-top (oldest-first) order as required by §4.4. Every key
/// comparison goes through the caller-supplied `KeyComparator` rather
/// than `K`'s native `Ord`/`PartialEq` -- a tree built over a custom
/// collation order must consolidate consistently with how `search` and
/// `mutation` judged a key to be present in the first place.
pub(crate) fn fold_leaf<K, V, C, VE>(view: &ChainView<'_, K, V>, cmp: &C, value_eq: &VE) -> LeafBase<K, V>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let mut base = match &view.base.kind {
        LinkKind::LeafBase(b) => LeafBase {
            entries: b.entries.clone(),
            range: clone_range(&b.range),
            sibling: b.sibling,
        },
        _ => unreachable!("fold_leaf called on a non-leaf chain"),
    };

    for delta in view.deltas.iter().rev() {
        match delta {
            LinkKind::Insert(k, v) => base.entries.push(((*k).clone(), (*v).clone())),
            LinkKind::Delete(k, v) => {
                if let Some(pos) = base
                    .entries
                    .iter()
                    .position(|(ek, ev)| cmp.eq(ek, k) && value_eq.eq(ev, v))
                {
                    base.entries.remove(pos);
                }
            }
            LinkKind::Update(k, v) => {
                if let Some(pos) = base.entries.iter().position(|(ek, _)| cmp.eq(ek, k)) {
                    base.entries[pos] = ((*k).clone(), (*v).clone());
                } else {
                    base.entries.push(((*k).clone(), (*v).clone()));
                }
            }
            LinkKind::Split { split_key, sibling } => {
                base.entries.retain(|(k, _)| cmp.cmp(k, split_key) == Ordering::Less);
                base.range.high = Some((*split_key).clone());
                base.sibling = Some(*sibling);
            }
            LinkKind::Merge { snapshot, .. } => {
                if let MergedSnapshot::Leaf(merged) = snapshot {
                    base.entries.extend(merged.entries.iter().cloned());
                    base.range.high = clone_opt(&merged.range.high);
                    base.sibling = merged.sibling;
                }
            }
            LinkKind::Remove => {
                // A consolidation should never be attempted on a removed
                // node; readers redirect before folding reaches here.
                unreachable!("fold_leaf encountered Remove");
            }
            other => unreachable!("unexpected delta kind on a leaf chain: {}", other.kind_name()),
        }
    }

    base.entries.sort_by(|a, b| cmp.cmp(&a.0, &b.0));
    base
}

/// Fold an internal chain view into an owned `InternalBase`.
pub(crate) fn fold_internal<K, V, C>(view: &ChainView<'_, K, V>, cmp: &C) -> InternalBase<K>
where
    K: Clone,
    C: KeyComparator<K>,
{
    let mut base = match &view.base.kind {
        LinkKind::InternalBase(b) => InternalBase {
            leftmost_child: b.leftmost_child,
            separators: b.separators.clone(),
            range: clone_range(&b.range),
            sibling: b.sibling,
        },
        _ => unreachable!("fold_internal called on a non-internal chain"),
    };

    for delta in view.deltas.iter().rev() {
        match delta {
            LinkKind::SplitIndex {
                split_key,
                new_child,
                ..
            } => {
                let idx = base
                    .separators
                    .partition_point(|(k, _)| cmp.cmp(k, split_key) != std::cmp::Ordering::Greater);
                base.separators.insert(idx, ((*split_key).clone(), *new_child));
            }
            LinkKind::RemoveIndex { deleted_key } => {
                if let Some(pos) = base
                    .separators
                    .iter()
                    .position(|(k, _)| cmp.cmp(k, deleted_key) == std::cmp::Ordering::Equal)
                {
                    base.separators.remove(pos);
                }
            }
            LinkKind::Split { split_key, sibling } => {
                base.separators.retain(|(k, _)| cmp.cmp(k, split_key) == std::cmp::Ordering::Less);
                base.range.high = Some(split_key.clone());
                base.sibling = Some(*sibling);
            }
            LinkKind::Merge { snapshot, .. } => {
                if let MergedSnapshot::Internal(merged) = snapshot {
                    base.separators.extend(merged.separators.iter().cloned());
                    base.range.high = clone_opt(&merged.range.high);
                    base.sibling = merged.sibling;
                }
            }
            LinkKind::Remove => unreachable!("fold_internal encountered Remove"),
            other => unreachable!("unexpected delta kind on an internal chain: {}", other.kind_name()),
        }
    }

    base.separators.sort_by(|a, b| cmp.cmp(&a.0, &b.0));
    base
}

fn clone_range<K: Clone>(range: &Range<K>) -> Range<K> {
    Range {
        low: clone_opt(&range.low),
        high: clone_opt(&range.high),
    }
}

fn clone_opt<K: Clone>(v: &Option<K>) -> Option<K> {
    v.clone()
}

/// Opportunistic consolidation: if the chain at `id` is at least
/// `max_chain_len` long, fold it and CAS the new base in. Returns
/// `true` if a new base was published (by this thread or was already
/// short enough that nothing needed doing is *not* counted as success
/// here -- callers only care whether consolidation was attempted and
/// whether the tree is now more compact).
pub(crate) fn maybe_consolidate_leaf<K, V, C, VE>(
    table: &MappingTable<K, V>,
    id: NodeId,
    max_chain_len: usize,
    cmp: &C,
    value_eq: &VE,
    guard: &Guard,
) -> bool
where
    K: Clone + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let head = table.get(id, guard);
    if head.is_null() {
        return false;
    }
    let head_link = unsafe { head.deref() };
    if head_link.kind.is_base() || (head_link.chain_len as usize) < max_chain_len {
        return false;
    }
    let view = walk_chain(head, guard);
    let folded = fold_leaf(&view, cmp, value_eq);
    let new_base = Owned::new(ChainLink::base(LinkKind::LeafBase(folded)));
    match table.install(id, head, new_base, guard) {
        Ok(_) => {
            log::debug!(target: "bwtree::consolidate", "consolidated leaf {:?} (chain_len={})", id, view.chain_len);
            unsafe { epoch::retire(head, guard) };
            true
        }
        Err(_) => false,
    }
}

pub(crate) fn maybe_consolidate_internal<K, V, C>(
    table: &MappingTable<K, V>,
    id: NodeId,
    max_chain_len: usize,
    cmp: &C,
    guard: &Guard,
) -> bool
where
    K: Clone + 'static,
    V: 'static,
    C: KeyComparator<K>,
{
    let head = table.get(id, guard);
    if head.is_null() {
        return false;
    }
    let head_link = unsafe { head.deref() };
    if head_link.kind.is_base() || (head_link.chain_len as usize) < max_chain_len {
        return false;
    }
    let view = walk_chain(head, guard);
    let folded = fold_internal(&view, cmp);
    let new_base = Owned::new(ChainLink::base(LinkKind::InternalBase(folded)));
    match table.install(id, head, new_base, guard) {
        Ok(_) => {
            log::debug!(target: "bwtree::consolidate", "consolidated internal {:?} (chain_len={})", id, view.chain_len);
            unsafe { epoch::retire(head, guard) };
            true
        }
        Err(_) => false,
    }
}
