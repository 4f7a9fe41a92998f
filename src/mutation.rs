//! Mutation (component D): prepend an `Insert`/`Update`/`Delete` delta
//! onto a leaf's chain with CAS retry, then let consolidation and the
//! structural-modification checks run opportunistically once the
//! delta is visible.

use crossbeam_epoch::{Atomic, Guard, Owned};
use crossbeam_utils::Backoff;

use crate::consolidate;
use crate::node::{ChainLink, LinkKind};
use crate::search;
use crate::tree::{BwTree, KeyComparator, ValueComparator};

/// Returns whether `(key, value)` was newly added: always `true` when
/// the tree is a true multimap (`allow_duplicates`), and `false` when
/// configured with update semantics and `key` already had a value
/// (the installed delta is an `Update`, not an `Insert`, in that case).
pub(crate) fn insert<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, key: K, value: V, guard: &Guard) -> bool
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let backoff = Backoff::new();
    loop {
        let descent = search::descend_to_leaf(tree, &key, guard);
        let leaf_id = descent.leaf_id;
        let head = tree.table.get(leaf_id, guard);
        debug_assert!(!head.is_null(), "a published leaf id must have a chain head");
        let view = consolidate::walk_chain(head, guard);

        let existing = !tree.config.allow_duplicates && descent.leaf.entries.iter().any(|(k, _)| tree.cmp.eq(k, &key));
        let kind = if existing {
            LinkKind::Update(key.clone(), value.clone())
        } else {
            LinkKind::Insert(key.clone(), value.clone())
        };
        let delta = ChainLink::delta(kind, view.chain_len, Atomic::from(head));

        match tree.table.install(leaf_id, head, Owned::new(delta), guard) {
            Ok(_) => {
                log::trace!(target: "bwtree::mutation", "inserted into {:?}", leaf_id);
                tree.consolidate_if_needed(leaf_id, true, guard);
                tree.maybe_split(leaf_id, true, guard);
                return !existing;
            }
            Err(_) => {
                log::trace!(target: "bwtree::mutation", "CAS contention inserting into {:?}, retrying", leaf_id);
                backoff.spin();
                continue;
            }
        }
    }
}

pub(crate) fn delete<K, V, C, VE>(tree: &BwTree<K, V, C, VE>, key: &K, value: &V, guard: &Guard) -> bool
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    let backoff = Backoff::new();
    loop {
        let descent = search::descend_to_leaf(tree, key, guard);
        let leaf_id = descent.leaf_id;
        let present = descent
            .leaf
            .entries
            .iter()
            .any(|(k, v)| tree.cmp.eq(k, key) && tree.value_eq.eq(v, value));
        if !present {
            return false;
        }

        let head = tree.table.get(leaf_id, guard);
        debug_assert!(!head.is_null(), "a published leaf id must have a chain head");
        let view = consolidate::walk_chain(head, guard);
        let delta = ChainLink::delta(
            LinkKind::Delete(key.clone(), value.clone()),
            view.chain_len,
            Atomic::from(head),
        );

        match tree.table.install(leaf_id, head, Owned::new(delta), guard) {
            Ok(_) => {
                log::trace!(target: "bwtree::mutation", "deleted from {:?}", leaf_id);
                tree.consolidate_if_needed(leaf_id, true, guard);
                tree.maybe_merge(&descent.ancestors, leaf_id, true, guard);
                return true;
            }
            Err(_) => {
                log::trace!(target: "bwtree::mutation", "CAS contention deleting from {:?}, retrying", leaf_id);
                backoff.spin();
                continue;
            }
        }
    }
}
