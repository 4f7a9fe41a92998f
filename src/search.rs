//! Search path (component C): descend from the root to the leaf that
//! should contain a key, folding each chain as it is visited and
//! transparently following `Split`/`Remove` redirects along the way.
//!
//! Interpretation is shared with `consolidate`'s fold functions rather
//! than reimplemented as a first-match top-down scan: both are bounded
//! by `max_chain_len`, so a full fold costs the same order of work as a
//! short-circuiting scan at the tree's default thresholds, and sharing
//! the code means the read path and the consolidation path can never
//! disagree about what a chain means.

use crossbeam_epoch::Guard;
use smallvec::SmallVec;
use std::cmp::Ordering;

use crate::consolidate::{self, ChainView};
use crate::node::{LeafBase, LinkKind, NodeId};
use crate::smo;
use crate::tree::{BwTree, KeyComparator, ValueComparator};

/// Everything a mutation needs after a descent: the leaf found, its
/// folded contents, and the chain of internal ancestors visited (for
/// help-along and merge reconciliation).
pub(crate) struct DescentResult<K, V> {
    pub(crate) ancestors: SmallVec<[NodeId; 8]>,
    pub(crate) leaf_id: NodeId,
    pub(crate) leaf: LeafBase<K, V>,
}

/// Post a `SplitIndex` on the parent that has not yet recorded a
/// sibling created by a completed `Split` delta, or fix up the root if
/// there is no parent to post to. Best-effort: a lost CAS here just
/// means the next thread to notice the same gap tries again.
fn help_along<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    ancestors: &SmallVec<[NodeId; 8]>,
    split_node: NodeId,
    split_key: K,
    new_child: NodeId,
    guard: &Guard,
) where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    match ancestors.last() {
        Some(&parent_id) => smo::help_along_split(tree, parent_id, split_key, new_child, guard),
        None => smo::help_along_root_split(tree, split_node, split_key, new_child, guard),
    }
}

fn is_removed<K, V>(view: &ChainView<'_, K, V>) -> bool {
    view.deltas.iter().copied().any(|d| matches!(d, LinkKind::Remove))
}

/// Resolve a `Remove`'d node reached by descending from `ancestors.last()`
/// (the node's parent -- the loop that builds `ancestors` always pushes a
/// node before descending into one of its children) to the left sibling
/// that absorbs it via `Merge`, per §4.3 policy 1. The removed node's own
/// `sibling` field is a *right* link to an unrelated neighbour (§3) and
/// must never be followed here -- doing so jumps past the node that
/// actually holds the merged data and silently drops whatever key was
/// being searched for.
///
/// Returns `None` when the parent no longer has a separator for `id` (the
/// merge fully completed concurrently, or the read was otherwise stale);
/// callers restart the whole descent from the root in that case, the same
/// way a stale-parent range mismatch already does.
fn left_sibling_of_removed<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    ancestors: &SmallVec<[NodeId; 8]>,
    id: NodeId,
    guard: &Guard,
) -> Option<NodeId>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let &parent_id = ancestors.last()?;
    let parent_head = tree.table.get(parent_id, guard);
    if parent_head.is_null() {
        return None;
    }
    let parent_view = consolidate::walk_chain(parent_head, guard);
    let parent_folded = consolidate::fold_internal(&parent_view, &tree.cmp);
    if parent_folded.leftmost_child == id {
        // The leftmost child is never merged away (smo::maybe_merge skips
        // it, since there is no separator key to retract for it); a
        // reader should not observe this, but fall back to a restart
        // rather than assume a sibling that doesn't exist.
        return None;
    }
    let idx = parent_folded.separators.iter().position(|(_, child)| *child == id)?;
    Some(if idx == 0 {
        parent_folded.leftmost_child
    } else {
        parent_folded.separators[idx - 1].1
    })
}

pub(crate) fn descend_to_leaf<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    key: &K,
    guard: &Guard,
) -> DescentResult<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let mut ancestors: SmallVec<[NodeId; 8]> = SmallVec::new();
    let mut id = tree.root;
    loop {
        let head = tree.table.get(id, guard);
        let view = consolidate::walk_chain(head, guard);
        if is_removed(&view) {
            match left_sibling_of_removed(tree, &ancestors, id, guard) {
                Some(left) => {
                    id = left;
                    continue;
                }
                None => {
                    ancestors.clear();
                    id = tree.root;
                    continue;
                }
            }
        }
        match &view.base.kind {
            LinkKind::InternalBase(_) => {
                let folded = consolidate::fold_internal(&view, &tree.cmp);
                if !folded.range.contains(&tree.cmp, key) {
                    if let (Some(sibling), Some(split_key)) = (folded.sibling, folded.range.high.clone()) {
                        help_along(tree, &ancestors, id, split_key, sibling, guard);
                        id = sibling;
                        continue;
                    }
                }
                ancestors.push(id);
                id = folded.child_for(&tree.cmp, key);
            }
            LinkKind::LeafBase(_) => {
                let folded = consolidate::fold_leaf(&view, &tree.cmp, &tree.value_eq);
                if !folded.range.contains(&tree.cmp, key) {
                    if let (Some(sibling), Some(split_key)) = (folded.sibling, folded.range.high.clone()) {
                        help_along(tree, &ancestors, id, split_key, sibling, guard);
                        id = sibling;
                        continue;
                    }
                }
                return DescentResult {
                    ancestors,
                    leaf_id: id,
                    leaf: folded,
                };
            }
            _ => unreachable!("chain base must resolve to a leaf or an internal node"),
        }
    }
}

pub(crate) fn descend_to_leftmost_leaf<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, guard: &Guard) -> DescentResult<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let mut ancestors: SmallVec<[NodeId; 8]> = SmallVec::new();
    let mut id = tree.root;
    loop {
        let head = tree.table.get(id, guard);
        let view = consolidate::walk_chain(head, guard);
        if is_removed(&view) {
            // The leftmost path never descends into a merged-away node
            // (smo::maybe_merge skips the leftmost child), but a sibling
            // of an ancestor could still be hit if the tree shrank; fall
            // back to a root restart exactly as `descend_to_leaf` does.
            match left_sibling_of_removed(tree, &ancestors, id, guard) {
                Some(left) => {
                    id = left;
                    continue;
                }
                None => {
                    ancestors.clear();
                    id = tree.root;
                    continue;
                }
            }
        }
        match &view.base.kind {
            LinkKind::InternalBase(_) => {
                let folded = consolidate::fold_internal(&view, &tree.cmp);
                ancestors.push(id);
                id = folded.leftmost_child;
            }
            LinkKind::LeafBase(_) => {
                let folded = consolidate::fold_leaf(&view, &tree.cmp, &tree.value_eq);
                return DescentResult {
                    ancestors,
                    leaf_id: id,
                    leaf: folded,
                };
            }
            _ => unreachable!("chain base must resolve to a leaf or an internal node"),
        }
    }
}

/// Load and fold the leaf at `id`, following `Remove` redirects (which may
/// chain across more than one hop if several neighbours merged away in
/// sequence) until a live leaf base is reached. Shared by the eager
/// `search_range` scan and the lazy `Cursor`.
///
/// Unlike `descend_to_leaf`, there is no `ancestors` chain available here
/// (the caller is resuming a sibling scan, not descending from the root),
/// so a `Remove` is resolved by re-descending from the root using the
/// removed node's own `range.low` -- still valid, since only the chain
/// head changes when a node is removed -- which lands on whichever leaf
/// now legitimately owns that key.
pub(crate) fn load_leaf<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, mut id: NodeId, guard: &Guard) -> LeafBase<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    loop {
        let head = tree.table.get(id, guard);
        let view = consolidate::walk_chain(head, guard);
        if is_removed(&view) {
            let restart_key = match &view.base.kind {
                LinkKind::LeafBase(b) => b.range.low.clone(),
                _ => unreachable!("load_leaf called on a non-leaf chain"),
            };
            id = match restart_key {
                Some(key) => descend_to_leaf(tree, &key, guard).leaf_id,
                None => descend_to_leftmost_leaf(tree, guard).leaf_id,
            };
            continue;
        }
        return consolidate::fold_leaf(&view, &tree.cmp, &tree.value_eq);
    }
}

pub(crate) fn search_key<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, key: &K, guard: &Guard) -> Vec<V>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let descent = descend_to_leaf(tree, key, guard);
    let leaf = &descent.leaf;
    let start = leaf.lower_bound(&tree.cmp, key);
    leaf.entries[start..]
        .iter()
        .take_while(|(k, _)| tree.cmp.eq(k, key))
        .map(|(_, v)| v.clone())
        .collect()
}

pub(crate) fn search_range<K, V, C, VE>(
    tree: &BwTree<K, V, C, VE>,
    low: Option<&K>,
    high: Option<&K>,
    guard: &Guard,
) -> Vec<(K, V)>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let mut result = Vec::new();
    let mut leaf = match low {
        Some(k) => descend_to_leaf(tree, k, guard).leaf,
        None => descend_to_leftmost_leaf(tree, guard).leaf,
    };
    loop {
        for (k, v) in leaf.entries.iter() {
            if let Some(lo) = low {
                if tree.cmp.cmp(k, lo) == Ordering::Less {
                    continue;
                }
            }
            if let Some(hi) = high {
                if tree.cmp.cmp(k, hi) != Ordering::Less {
                    return result;
                }
            }
            result.push((k.clone(), v.clone()));
        }
        match leaf.sibling {
            Some(next_id) => leaf = load_leaf(tree, next_id, guard),
            None => return result,
        }
    }
}
