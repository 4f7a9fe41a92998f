//! Node algebra (component B): tagged variants for base nodes and delta
//! records, plus the small helpers used to reason about key ranges.
//!
//! Deltas are allocated on the heap and linked through `crossbeam_epoch`
//! atomics rather than dispatched virtually: this keeps the hot paths in
//! `search`/`consolidate` a single exhaustive `match`, which the compiler
//! can inline and bounds-check once instead of per virtual call.
//!
//! Every comparison here goes through a caller-supplied `KeyComparator`
//! rather than `Ord` directly -- mirroring the original design's
//! `KeyComparator`/`KeyEqualityChecker` template parameters -- so callers
//! can use a collation order that differs from `K`'s natural one.

use crossbeam_epoch::Atomic;
use std::cmp::Ordering;
use std::fmt;

use crate::tree::KeyComparator;

/// Opaque logical node identifier. Never reused while any thread could
/// still observe it; allocation is monotonic (see `mapping_table`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The distinguished id whose mapping-table slot holds the current
    /// root chain head.
    pub(crate) const ROOT: NodeId = NodeId(0);

    pub(crate) fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Half-open range boundary. `None` on the low side means "-infinity",
/// `None` on the high side means "+infinity".
#[derive(Clone)]
pub(crate) struct Range<K> {
    pub(crate) low: Option<K>,
    pub(crate) high: Option<K>,
}

impl<K> Range<K> {
    pub(crate) fn whole() -> Self {
        Range { low: None, high: None }
    }

    pub(crate) fn contains<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> bool {
        let above_low = match &self.low {
            Some(low) => cmp.cmp(key, low) != Ordering::Less,
            None => true,
        };
        let below_high = match &self.high {
            Some(high) => cmp.cmp(key, high) == Ordering::Less,
            None => true,
        };
        above_low && below_high
    }
}

/// Base leaf node: a dense, sorted multimap of `(key, value)` covering
/// `range`, right-linked to `sibling`.
#[derive(Clone)]
pub(crate) struct LeafBase<K, V> {
    pub(crate) entries: Vec<(K, V)>,
    pub(crate) range: Range<K>,
    pub(crate) sibling: Option<NodeId>,
}

impl<K, V> LeafBase<K, V> {
    pub(crate) fn empty() -> Self {
        LeafBase {
            entries: Vec::new(),
            range: Range::whole(),
            sibling: None,
        }
    }

    /// Index of the first entry with key >= `key`.
    pub(crate) fn lower_bound<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> usize {
        self.entries.partition_point(|(k, _)| cmp.cmp(k, key) == Ordering::Less)
    }
}

/// Base internal node: separators mapping `(key_i, ..) -> child_i`, with
/// `leftmost_child` owning everything below the first separator.
#[derive(Clone)]
pub(crate) struct InternalBase<K> {
    pub(crate) leftmost_child: NodeId,
    /// Sorted ascending by key. `separators[i]` owns `[key_i, key_{i+1})`
    /// (or `[key_i, range.high)` for the last entry).
    pub(crate) separators: Vec<(K, NodeId)>,
    pub(crate) range: Range<K>,
    pub(crate) sibling: Option<NodeId>,
}

impl<K> InternalBase<K> {
    pub(crate) fn child_for<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> NodeId {
        // Separator semantics: child at entry i owns [key_{i-1}, key_i),
        // leftmost owns [low, key_0). We want the last separator whose
        // key is <= key.
        let idx = self
            .separators
            .partition_point(|(k, _)| cmp.cmp(k, key) != Ordering::Greater);
        if idx == 0 {
            self.leftmost_child
        } else {
            self.separators[idx - 1].1
        }
    }
}

/// A snapshot of a node's contents folded into a surviving sibling by a
/// `Merge` delta. Captured at merge-posting time rather than chasing a
/// live pointer into the removed node, so consolidation never has to
/// re-resolve a `Remove`'d chain.
#[derive(Clone)]
pub(crate) enum MergedSnapshot<K, V> {
    Leaf(LeafBase<K, V>),
    Internal(InternalBase<K>),
}

/// The payload carried by one link in a chain. Base variants terminate
/// the chain (their `next` pointer, stored on `ChainLink`, is unused).
pub(crate) enum LinkKind<K, V> {
    LeafBase(LeafBase<K, V>),
    InternalBase(InternalBase<K>),
    Insert(K, V),
    Delete(K, V),
    Update(K, V),
    Split {
        split_key: K,
        sibling: NodeId,
    },
    SplitIndex {
        split_key: K,
        boundary_key: K,
        new_child: NodeId,
    },
    Remove,
    Merge {
        merge_key: K,
        snapshot: MergedSnapshot<K, V>,
    },
    RemoveIndex {
        deleted_key: K,
    },
}

impl<K, V> LinkKind<K, V> {
    pub(crate) fn is_base(&self) -> bool {
        matches!(self, LinkKind::LeafBase(_) | LinkKind::InternalBase(_))
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            LinkKind::LeafBase(_) => "leaf-base",
            LinkKind::InternalBase(_) => "internal-base",
            LinkKind::Insert(..) => "insert",
            LinkKind::Delete(..) => "delete",
            LinkKind::Update(..) => "update",
            LinkKind::Split { .. } => "split",
            LinkKind::SplitIndex { .. } => "split-index",
            LinkKind::Remove => "remove",
            LinkKind::Merge { .. } => "merge",
            LinkKind::RemoveIndex { .. } => "remove-index",
        }
    }
}

/// One link of a chain: a delta or a base node, plus the pointer to the
/// next (older) link and the distance-to-base counter used by the
/// consolidation threshold check.
pub(crate) struct ChainLink<K, V> {
    pub(crate) next: Atomic<ChainLink<K, V>>,
    /// Distance from this link down to (and including) the base.
    pub(crate) chain_len: u32,
    pub(crate) kind: LinkKind<K, V>,
}

impl<K, V> ChainLink<K, V> {
    pub(crate) fn base(kind: LinkKind<K, V>) -> Self {
        debug_assert!(kind.is_base());
        ChainLink {
            next: Atomic::null(),
            chain_len: 0,
            kind,
        }
    }

    pub(crate) fn delta(kind: LinkKind<K, V>, next_chain_len: u32, next: Atomic<ChainLink<K, V>>) -> Self {
        debug_assert!(!kind.is_base());
        ChainLink {
            next,
            chain_len: next_chain_len + 1,
            kind,
        }
    }
}
