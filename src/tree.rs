//! Public contract (component H): the `BwTree` handle, its
//! configuration, and the comparator traits callers plug in to control
//! ordering and value equality without the tree capturing any hidden
//! mutable state of its own.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crossbeam_epoch::{Guard, Owned};

use crate::consolidate;
use crate::epoch;
use crate::error::ConfigError;
use crate::mapping_table::MappingTable;
use crate::mutation;
use crate::node::{ChainLink, LeafBase, LinkKind, NodeId};
use crate::search;
use crate::smo;

/// Caller-supplied key ordering. Kept as an explicit trait (rather than
/// requiring `K: Ord`) so a tree can be built over a collation order
/// that differs from `K`'s natural one, and so the comparator can carry
/// its own configuration (locale tables, case folding, ...) without
/// reaching for `thread_local!` or similar hidden state.
pub trait KeyComparator<K>: Send + Sync {
    fn cmp(&self, a: &K, b: &K) -> Ordering;

    fn eq(&self, a: &K, b: &K) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }
}

/// Caller-supplied value equality, used to disambiguate which of a
/// key's (possibly several) values a `delete` removes.
pub trait ValueComparator<V>: Send + Sync {
    fn eq(&self, a: &V, b: &V) -> bool;
}

/// The default comparator for types that already implement `Ord`.
pub struct OrdKeyComparator<K>(PhantomData<fn(&K)>);

impl<K> OrdKeyComparator<K> {
    pub fn new() -> Self {
        OrdKeyComparator(PhantomData)
    }
}

impl<K> Default for OrdKeyComparator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> KeyComparator<K> for OrdKeyComparator<K> {
    fn cmp(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// The default value comparator for types that already implement
/// `PartialEq`.
pub struct EqValueComparator<V>(PhantomData<fn(&V)>);

impl<V> EqValueComparator<V> {
    pub fn new() -> Self {
        EqValueComparator(PhantomData)
    }
}

impl<V> Default for EqValueComparator<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: PartialEq> ValueComparator<V> for EqValueComparator<V> {
    fn eq(&self, a: &V, b: &V) -> bool {
        a == b
    }
}

/// Tunable thresholds governing when a chain is consolidated and when
/// a base node is split or merged. Validated once at construction so
/// every later check can assume the invariants hold.
#[derive(Clone, Debug)]
pub struct BwTreeConfig {
    /// A chain at least this long is folded into a fresh base on the
    /// next operation that passes through it.
    pub max_chain_len: usize,
    /// A leaf or internal base at or above this many entries is split.
    pub max_node_size: usize,
    /// A leaf or internal base at or below this many entries is a
    /// candidate for merging into a sibling.
    pub min_node_size: usize,
    /// Whether `insert` accepts more than one value under the same
    /// key (multimap semantics) or treats a second `insert` of an
    /// existing key as an update.
    pub allow_duplicates: bool,
}

impl Default for BwTreeConfig {
    fn default() -> Self {
        BwTreeConfig {
            max_chain_len: 8,
            max_node_size: 256,
            min_node_size: 64,
            allow_duplicates: true,
        }
    }
}

impl BwTreeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chain_len < 1 {
            return Err(ConfigError::ChainLenTooSmall(self.max_chain_len));
        }
        if self.max_node_size < 2 {
            return Err(ConfigError::MaxNodeSizeTooSmall(self.max_node_size));
        }
        let half_max = self.max_node_size / 2;
        if self.min_node_size >= half_max {
            return Err(ConfigError::MinNotBelowHalfMax {
                min: self.min_node_size,
                half_max,
            });
        }
        Ok(())
    }
}

/// A latch-free, ordered, multi-valued index.
///
/// `K`/`V` carry no trait bounds at the type level beyond what the
/// comparators below require; ordering and value equality are supplied
/// explicitly through `C`/`VE` rather than inferred from `Ord`/`Eq`.
pub struct BwTree<K, V, C = OrdKeyComparator<K>, VE = EqValueComparator<V>> {
    pub(crate) table: MappingTable<K, V>,
    pub(crate) root: NodeId,
    pub(crate) config: BwTreeConfig,
    pub(crate) cmp: C,
    pub(crate) value_eq: VE,
}

impl<K, V> BwTree<K, V, OrdKeyComparator<K>, EqValueComparator<V>>
where
    K: Ord + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    /// Construct a tree ordered by `K`'s natural `Ord` implementation.
    pub fn with_ord(config: BwTreeConfig) -> Result<Self, ConfigError> {
        Self::new(config, OrdKeyComparator::new(), EqValueComparator::new())
    }
}

impl<K, V, C, VE> BwTree<K, V, C, VE>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    pub fn new(config: BwTreeConfig, cmp: C, value_eq: VE) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = MappingTable::new();
        let root_id = table.allocate_id();
        debug_assert_eq!(root_id, NodeId::ROOT);
        let guard = epoch::pin();
        table.publish(
            root_id,
            Owned::new(ChainLink::base(LinkKind::LeafBase(LeafBase::empty()))),
            &guard,
        );
        drop(guard);
        Ok(BwTree {
            table,
            root: root_id,
            config,
            cmp,
            value_eq,
        })
    }

    /// Insert `(key, value)`. If `allow_duplicates` is false and `key`
    /// is already present, the existing value is replaced. Returns
    /// whether the pair was newly added (always `true` for a true
    /// multimap; `false` when an existing key's value was overwritten).
    pub fn insert(&self, key: K, value: V) -> bool {
        let guard = epoch::pin();
        mutation::insert(self, key, value, &guard)
    }

    /// Remove the first value equal (per `VE`) to `value` under `key`.
    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &K, value: &V) -> bool {
        let guard = epoch::pin();
        mutation::delete(self, key, value, &guard)
    }

    /// Look up every value currently stored under `key`.
    pub fn search_key(&self, key: &K) -> Vec<V> {
        let guard = epoch::pin();
        search::search_key(self, key, &guard)
    }

    /// Collect every `(key, value)` pair with `low <= key < high`.
    /// `None` on either bound means unbounded on that side.
    pub fn search_range(&self, low: Option<&K>, high: Option<&K>) -> Vec<(K, V)> {
        let guard = epoch::pin();
        search::search_range(self, low, high, &guard)
    }

    /// Collect every `(key, value)` pair in the tree, in key order.
    pub fn search_all(&self) -> Vec<(K, V)> {
        self.search_range(None, None)
    }

    /// A forward cursor over `[low, high)`, starting at the lower bound
    /// and obeying sibling links as later leaves are reached. The cursor
    /// pins its own epoch guard at construction and holds it for its
    /// entire lifetime -- `Drop` is the "close" operation described in
    /// the external-interfaces note; there is no separate explicit-close
    /// method, so a closed cursor cannot be observed by the type system
    /// (it simply no longer exists).
    pub fn iter(&self, low: Option<&K>, high: Option<&K>) -> Cursor<'_, K, V, C, VE> {
        let guard = epoch::pin();
        let descent = match low {
            Some(k) => search::descend_to_leaf(self, k, &guard),
            None => search::descend_to_leftmost_leaf(self, &guard),
        };
        let mut entries = descent.leaf.entries;
        if let Some(lo) = low {
            entries.retain(|(k, _)| self.cmp.cmp(k, lo) != Ordering::Less);
        }
        let mut finished = false;
        if let Some(hi) = high {
            if let Some(pos) = entries.iter().position(|(k, _)| self.cmp.cmp(k, hi) != Ordering::Less) {
                entries.truncate(pos);
                finished = true;
            }
        }
        Cursor {
            tree: self,
            guard,
            buffer: entries.into_iter(),
            next_leaf: if finished { None } else { descent.leaf.sibling },
            high: high.cloned(),
        }
    }

    /// An approximate entry count, obtained by walking every leaf.
    /// "Approximate" because a concurrent writer can add or remove
    /// entries while this walk is in flight; it never double-counts or
    /// drops a leaf, so the error is bounded by concurrent activity
    /// during the call, not by traversal bugs.
    pub fn len_hint(&self) -> usize {
        self.search_all().len()
    }

    pub(crate) fn guard(&self) -> Guard {
        epoch::pin()
    }

    pub(crate) fn consolidate_if_needed(&self, id: NodeId, is_leaf: bool, guard: &Guard) {
        if is_leaf {
            consolidate::maybe_consolidate_leaf(
                &self.table,
                id,
                self.config.max_chain_len,
                &self.cmp,
                &self.value_eq,
                guard,
            );
        } else {
            consolidate::maybe_consolidate_internal(&self.table, id, self.config.max_chain_len, &self.cmp, guard);
        }
    }

    pub(crate) fn maybe_split(&self, id: NodeId, is_leaf: bool, guard: &Guard) {
        smo::maybe_split(self, id, is_leaf, guard);
    }

    pub(crate) fn maybe_merge(&self, ancestors: &[NodeId], id: NodeId, is_leaf: bool, guard: &Guard) {
        smo::maybe_merge(self, ancestors, id, is_leaf, guard);
    }
}

/// A forward cursor over `(K, V)` that holds a live epoch guard for its
/// entire lifetime, fetching and folding one leaf at a time rather than
/// materializing the whole range up front. Closing the cursor (dropping
/// it) releases the guard; there is no other way to observe a "closed"
/// cursor since the value no longer exists once dropped.
pub struct Cursor<'t, K, V, C, VE> {
    tree: &'t BwTree<K, V, C, VE>,
    guard: Guard,
    buffer: std::vec::IntoIter<(K, V)>,
    next_leaf: Option<NodeId>,
    high: Option<K>,
}

impl<'t, K, V, C, VE> Iterator for Cursor<'t, K, V, C, VE>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
    C: KeyComparator<K>,
    VE: ValueComparator<V>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(item);
            }
            let leaf_id = self.next_leaf.take()?;
            let folded = search::load_leaf(self.tree, leaf_id, &self.guard);
            let mut entries = folded.entries;
            if let Some(hi) = &self.high {
                if let Some(pos) = entries.iter().position(|(k, _)| self.tree.cmp.cmp(k, hi) != Ordering::Less) {
                    entries.truncate(pos);
                } else {
                    self.next_leaf = folded.sibling;
                }
            } else {
                self.next_leaf = folded.sibling;
            }
            self.buffer = entries.into_iter();
        }
    }
}
