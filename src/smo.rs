//! Structural modifications (component F): split and merge, each
//! posted as an atomic delta and reconciled with the parent through a
//! separate, best-effort help-along step.
//!
//! A split is visible correctly (via the new node's sibling pointer)
//! the instant its `Split` delta lands, before any thread has posted
//! the matching `SplitIndex` on the parent. Readers that walk off the
//! end of a split node's range redirect to its sibling themselves
//! (`search::help_along`) and opportunistically post the missing
//! `SplitIndex`; nobody blocks on that happening.
//!
//! Merge is the inverse and considerably more delicate: it touches
//! three nodes (the node going away, its sibling, and the parent) and
//! none of those three posts can be undone once made. `maybe_merge`
//! therefore posts `Remove` on the doomed node *first* -- the one post
//! that can still cleanly abort if its CAS loses a race, since nothing
//! else has been published yet. Once `Remove` lands, the node is
//! write-protected (no further delta can ever be appended ahead of it),
//! so its folded snapshot is final and safe to hand to the sibling; the
//! `Merge` on the sibling and the `RemoveIndex` on the parent are then
//! retried until each succeeds, because abandoning either afterward
//! would strand the removed node's data with no chain left pointing at
//! it. Merging the tree's leftmost child is skipped: there is no
//! separator key to remove for it, and rotating `leftmost_child` itself
//! is left as a follow-up (see DESIGN.md).

use crossbeam_epoch::{Atomic, Guard, Owned};
use crossbeam_utils::Backoff;

use crate::consolidate;
use crate::epoch;
use crate::node::{ChainLink, InternalBase, LeafBase, LinkKind, MergedSnapshot, NodeId, Range};
use crate::tree::{BwTree, KeyComparator, ValueComparator};

pub(crate) fn maybe_split<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, id: NodeId, is_leaf: bool, guard: &Guard)
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let head = tree.table.get(id, guard);
    if head.is_null() {
        return;
    }
    let view = consolidate::walk_chain(head, guard);
    if view.deltas.iter().copied().any(|d| matches!(d, LinkKind::Remove)) {
        return;
    }

    if is_leaf {
        let folded = consolidate::fold_leaf(&view, &tree.cmp, &tree.value_eq);
        if folded.entries.len() < tree.config.max_node_size {
            return;
        }
        let mid = folded.entries.len() / 2;
        let split_key = folded.entries[mid].0.clone();
        let sibling_entries = folded.entries[mid..].to_vec();
        let sibling_id = tree.table.allocate_id();
        let sibling_base = LeafBase {
            entries: sibling_entries,
            range: Range {
                low: Some(split_key.clone()),
                high: folded.range.high.clone(),
            },
            sibling: folded.sibling,
        };
        tree.table
            .publish(sibling_id, Owned::new(ChainLink::base(LinkKind::LeafBase(sibling_base))), guard);
        let delta = ChainLink::delta(
            LinkKind::Split {
                split_key,
                sibling: sibling_id,
            },
            view.chain_len,
            Atomic::from(head),
        );
        if tree.table.install(id, head, Owned::new(delta), guard).is_ok() {
            log::debug!(target: "bwtree::smo", "split leaf {:?} -> {:?}", id, sibling_id);
        }
    } else {
        let folded = consolidate::fold_internal(&view, &tree.cmp);
        if folded.separators.len() + 1 < tree.config.max_node_size {
            return;
        }
        let mid = folded.separators.len() / 2;
        let split_key = folded.separators[mid].0.clone();
        let sibling_leftmost = folded.separators[mid].1;
        let sibling_separators = folded.separators[mid + 1..].to_vec();
        let sibling_id = tree.table.allocate_id();
        let sibling_base = InternalBase {
            leftmost_child: sibling_leftmost,
            separators: sibling_separators,
            range: Range {
                low: Some(split_key.clone()),
                high: folded.range.high.clone(),
            },
            sibling: folded.sibling,
        };
        tree.table.publish(
            sibling_id,
            Owned::new(ChainLink::base(LinkKind::InternalBase(sibling_base))),
            guard,
        );
        let delta = ChainLink::delta(
            LinkKind::Split {
                split_key,
                sibling: sibling_id,
            },
            view.chain_len,
            Atomic::from(head),
        );
        if tree.table.install(id, head, Owned::new(delta), guard).is_ok() {
            log::debug!(target: "bwtree::smo", "split internal {:?} -> {:?}", id, sibling_id);
        }
    }
}

/// If the root itself just split (there was no parent to post a
/// `SplitIndex` to), replace the root slot with a freshly built
/// internal node covering both halves.
pub(crate) fn help_along_root_split<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    old_root: NodeId,
    split_key: K,
    new_child: NodeId,
    guard: &Guard,
) where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    if old_root != tree.root {
        // Only the designated root slot gets replaced; a non-root
        // ancestorless split (shouldn't happen) is left for the next
        // descent to notice.
        return;
    }
    let head = tree.table.get(tree.root, guard);
    if head.is_null() {
        return;
    }
    let view = consolidate::walk_chain(head, guard);
    // If someone already replaced the root with a fresh internal node
    // that already accounts for this split, bail out quietly.
    if let LinkKind::InternalBase(existing) = &view.base.kind {
        if existing.separators.iter().any(|(k, _)| tree.cmp.eq(k, &split_key)) {
            return;
        }
    }
    let new_root_id = tree.table.allocate_id();
    // The old root's content moves to a fresh id; the root slot itself
    // becomes the new internal node so callers never need to learn a
    // new "root id".
    tree.table.publish(new_root_id, Owned::new(ChainLink::base(clone_base(&view))), guard);
    let new_root_base = InternalBase {
        leftmost_child: new_root_id,
        separators: vec![(split_key, new_child)],
        range: Range { low: None, high: None },
        sibling: None,
    };
    let owned = Owned::new(ChainLink::base(LinkKind::InternalBase(new_root_base)));
    match tree.table.install(tree.root, head, owned, guard) {
        Ok(_) => {
            log::debug!(target: "bwtree::smo", "root split: new internal root over {:?} and {:?}", new_root_id, new_child);
            unsafe { epoch::retire(head, guard) };
        }
        Err(_) => {
            // Lost the race; the id we allocated for the relocated
            // root content is simply never referenced again.
        }
    }
}

fn clone_base<K: Clone, V: Clone>(view: &consolidate::ChainView<'_, K, V>) -> LinkKind<K, V> {
    match &view.base.kind {
        LinkKind::LeafBase(b) => LinkKind::LeafBase(LeafBase {
            entries: b.entries.clone(),
            range: Range {
                low: b.range.low.clone(),
                high: b.range.high.clone(),
            },
            sibling: b.sibling,
        }),
        LinkKind::InternalBase(b) => LinkKind::InternalBase(InternalBase {
            leftmost_child: b.leftmost_child,
            separators: b.separators.clone(),
            range: Range {
                low: b.range.low.clone(),
                high: b.range.high.clone(),
            },
            sibling: b.sibling,
        }),
        _ => unreachable!("chain base must be a leaf or internal base"),
    }
}

/// Post the `SplitIndex` a completed child split is still missing on
/// `parent_id`. A no-op if the separator is already there.
pub(crate) fn help_along_split<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    parent_id: NodeId,
    split_key: K,
    new_child: NodeId,
    guard: &Guard,
) where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let head = tree.table.get(parent_id, guard);
    if head.is_null() {
        return;
    }
    let view = consolidate::walk_chain(head, guard);
    let already_posted = view.deltas.iter().copied().any(|d| {
        matches!(d, LinkKind::SplitIndex { split_key: k, .. } if tree.cmp.eq(k, &split_key))
    }) || matches!(&view.base.kind, LinkKind::InternalBase(b) if b.separators.iter().any(|(k, _)| tree.cmp.eq(k, &split_key)));
    if already_posted {
        return;
    }
    let delta = ChainLink::delta(
        LinkKind::SplitIndex {
            split_key: split_key.clone(),
            boundary_key: split_key,
            new_child,
        },
        view.chain_len,
        Atomic::from(head),
    );
    if tree.table.install(parent_id, head, Owned::new(delta), guard).is_ok() {
        log::debug!(target: "bwtree::smo", "posted SplitIndex on {:?} for {:?}", parent_id, new_child);
        // The parent just grew a separator; it may itself now be due for
        // consolidation or a split. Future descents will help-along a
        // parent split the same way this one was discovered, so no
        // recursive ancestor chain is needed here.
        tree.consolidate_if_needed(parent_id, false, guard);
        tree.maybe_split(parent_id, false, guard);
    }
}

pub(crate) fn maybe_merge<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    ancestors: &[NodeId],
    id: NodeId,
    is_leaf: bool,
    guard: &Guard,
) where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let Some(&parent_id) = ancestors.last() else {
        return;
    };
    let head = tree.table.get(id, guard);
    if head.is_null() {
        return;
    }
    let view = consolidate::walk_chain(head, guard);
    if view.deltas.iter().copied().any(|d| matches!(d, LinkKind::Remove)) {
        return;
    }

    let (sibling_id, snapshot, merge_key) = if is_leaf {
        let folded = consolidate::fold_leaf(&view, &tree.cmp, &tree.value_eq);
        if folded.entries.len() > tree.config.min_node_size {
            return;
        }
        let Some(sibling_id) = folded.sibling else { return };
        let merge_key = match folded.range.low.clone() {
            Some(k) => k,
            None => return,
        };
        (sibling_id, MergedSnapshot::Leaf(folded), merge_key)
    } else {
        let folded = consolidate::fold_internal(&view, &tree.cmp);
        if folded.separators.len() > tree.config.min_node_size {
            return;
        }
        let Some(sibling_id) = folded.sibling else { return };
        let merge_key = match folded.range.low.clone() {
            Some(k) => k,
            None => return,
        };
        (sibling_id, MergedSnapshot::Internal(folded), merge_key)
    };

    let parent_head = tree.table.get(parent_id, guard);
    if parent_head.is_null() {
        return;
    }
    let parent_view = consolidate::walk_chain(parent_head, guard);
    let parent_folded = consolidate::fold_internal(&parent_view, &tree.cmp);
    if parent_folded.leftmost_child == id {
        // No separator key to remove for the leftmost child.
        return;
    }
    let Some((deleted_key, _)) = parent_folded.separators.iter().find(|(_, child)| *child == id) else {
        return;
    };
    let deleted_key = deleted_key.clone();

    // Step 1: write-protect `id`. This is the only one of the three
    // posts allowed to simply bail -- nothing has been published yet,
    // so a lost CAS here leaves the tree exactly as it was. A writer
    // racing against `id` either wins and lands ahead of this `Remove`
    // (and `view`/the folded snapshot above is stale, so this attempt
    // must itself have lost the CAS below and retried/bailed) or loses
    // and retries against the now-Remove'd chain the same way a reader
    // redirects.
    let remove_delta = ChainLink::delta(LinkKind::Remove, view.chain_len, Atomic::from(head));
    if tree.table.install(id, head, Owned::new(remove_delta), guard).is_err() {
        return;
    }
    log::debug!(target: "bwtree::smo", "removed {:?}, folding into sibling {:?}", id, sibling_id);

    // Step 2: fold `id`'s snapshot into the sibling. `id` is already
    // write-protected, so its data is only reachable through `snapshot`
    // from here on -- this must keep retrying until it lands.
    let backoff = Backoff::new();
    loop {
        let sibling_head = tree.table.get(sibling_id, guard);
        if sibling_head.is_null() {
            break;
        }
        let sibling_view = consolidate::walk_chain(sibling_head, guard);
        let already_merged = sibling_view
            .deltas
            .iter()
            .copied()
            .any(|d| matches!(d, LinkKind::Merge { merge_key: k, .. } if tree.cmp.eq(k, &merge_key)));
        if already_merged {
            break;
        }
        let merge_delta = ChainLink::delta(
            LinkKind::Merge {
                merge_key: merge_key.clone(),
                snapshot: snapshot.clone(),
            },
            sibling_view.chain_len,
            Atomic::from(sibling_head),
        );
        match tree.table.install(sibling_id, sibling_head, Owned::new(merge_delta), guard) {
            Ok(_) => {
                log::debug!(target: "bwtree::smo", "merged {:?} into sibling {:?}", id, sibling_id);
                break;
            }
            Err(_) => backoff.spin(),
        }
    }

    // Step 3: retract the parent's separator for `id`. Also retried
    // until it lands or another thread's help-along beats it to it --
    // leaving a stale separator pointing at a removed node would make
    // every later descent through `id` redirect forever.
    let backoff = Backoff::new();
    loop {
        let parent_head = tree.table.get(parent_id, guard);
        if parent_head.is_null() {
            break;
        }
        let parent_view = consolidate::walk_chain(parent_head, guard);
        let parent_folded = consolidate::fold_internal(&parent_view, &tree.cmp);
        if !parent_folded.separators.iter().any(|(k, _)| tree.cmp.eq(k, &deleted_key)) {
            break;
        }
        let remove_index_delta = ChainLink::delta(
            LinkKind::RemoveIndex {
                deleted_key: deleted_key.clone(),
            },
            parent_view.chain_len,
            Atomic::from(parent_head),
        );
        match tree.table.install(parent_id, parent_head, Owned::new(remove_index_delta), guard) {
            Ok(_) => {
                log::debug!(target: "bwtree::smo", "removed separator {:?} on parent {:?}", deleted_key, parent_id);
                break;
            }
            Err(_) => backoff.spin(),
        }
    }

    // The parent just lost a separator; it may now be under-full
    // itself. Check whether it is due for consolidation or a merge
    // into *its* sibling, walking the ancestor chain one level up.
    tree.consolidate_if_needed(parent_id, false, guard);
    let grandparents = &ancestors[..ancestors.len() - 1];
    tree.maybe_merge(grandparents, parent_id, false, guard);
}
