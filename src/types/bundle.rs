use alloy::primitives::{Address, B256, BlockNumber, ChainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An inclusive block range on a single chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block of the range.
    pub from: BlockNumber,
    /// Last block of the range.
    pub to: BlockNumber,
}

impl BlockRange {
    /// Creates a new [`BlockRange`].
    pub const fn new(from: BlockNumber, to: BlockNumber) -> Self {
        Self { from, to }
    }

    /// Whether `block` falls inside the range.
    pub fn contains(&self, block: BlockNumber) -> bool {
        self.from <= block && block <= self.to
    }

    /// A range with `to < from` covers no blocks.
    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// Per-chain block ranges for one bundle.
///
/// The [`BTreeMap`] is the canonical chain-id ordering: two independent
/// recomputations over the same chain set walk chains identically. Ranges of
/// consecutive bundles are contiguous and non-overlapping per chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleBlockRanges(pub BTreeMap<ChainId, BlockRange>);

impl BundleBlockRanges {
    /// Range for `chain`, if it is part of the bundle.
    pub fn get(&self, chain: ChainId) -> Option<BlockRange> {
        self.0.get(&chain).copied()
    }

    /// Chains covered by the bundle, in canonical order.
    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.0.keys().copied()
    }

    /// Evaluation end block per chain.
    pub fn end_blocks(&self) -> BundleEndBlocks {
        self.0.iter().map(|(chain, range)| (*chain, range.to)).collect()
    }

    /// The block below each range start, i.e. the end blocks of the previous
    /// bundle.
    pub fn floors(&self) -> BundleEndBlocks {
        self.0.iter().map(|(chain, range)| (*chain, range.from.saturating_sub(1))).collect()
    }
}

impl FromIterator<(ChainId, BlockRange)> for BundleBlockRanges {
    fn from_iter<T: IntoIterator<Item = (ChainId, BlockRange)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-chain evaluation end blocks of a bundle.
pub type BundleEndBlocks = BTreeMap<ChainId, BlockNumber>;

/// The three Merkle roots committing one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRoots {
    /// Root of the pool rebalance tree.
    pub pool_rebalance_root: B256,
    /// Root of the relayer refund tree.
    pub relayer_refund_root: B256,
    /// Root of the slow relay tree.
    pub slow_relay_root: B256,
    /// Number of pool rebalance leaves, committed alongside the root.
    pub pool_rebalance_leaf_count: u32,
}

/// A root bundle proposed on the hub chain.
///
/// Pending until executed, disputed, or its challenge period lapses. The
/// committed end blocks are the immutable record validators recompute
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedRootBundle {
    /// Committed roots and leaf count.
    pub roots: BundleRoots,
    /// Account that proposed the bundle.
    pub proposer: Address,
    /// Unix seconds after which the bundle becomes executable.
    pub challenge_period_end: u64,
    /// Per-chain evaluation end blocks used to compute the roots.
    pub end_blocks: BundleEndBlocks,
    /// Hub block the proposal landed in.
    pub proposal_block: BlockNumber,
}

impl ProposedRootBundle {
    /// Whether the challenge period has elapsed as of `now` (unix seconds).
    pub fn is_executable(&self, now: u64) -> bool {
        now >= self.challenge_period_end
    }
}

/// A (chain, token) pair, the unit of balance accounting.
pub type ChainToken = (ChainId, Address);
