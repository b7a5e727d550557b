//! Bundle block range resolution with convergent widening retries.
//!
//! The resolver decides, per chain, which blocks the next bundle may cover
//! and how far back events must be fetched so every fill in that window can
//! be matched to its deposit. Widening re-fetches the whole window each round
//! rather than extending a cache; redundant queries are the price of keeping
//! the convergence argument trivial.

use crate::{
    config::DataworkerConfig,
    sources::{fetch_snapshot, EventSnapshot, EventSource, HubReader, SourceError},
    types::{BlockRange, BundleBlockRanges, BundleEndBlocks},
};
use alloy::primitives::{BlockNumber, ChainId};
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of range resolution.
///
/// Exhaustion is a first-class outcome, not an error: chains present in
/// `invalid_start_blocks` are ineligible for proposal and validation this
/// iteration, everything else proceeds.
#[derive(Debug, Clone)]
pub enum RangeResolution {
    /// Every fill inside the bundle region resolves to an observed deposit.
    Converged {
        /// Bundle block ranges for the next bundle.
        ranges: BundleBlockRanges,
        /// The snapshot the ranges were verified against.
        snapshot: EventSnapshot,
        /// Fetch rounds used.
        rounds: usize,
    },
    /// The retry ceiling was reached without convergence.
    Exhausted {
        /// Best-effort bundle block ranges.
        ranges: BundleBlockRanges,
        /// The widest snapshot fetched.
        snapshot: EventSnapshot,
        /// Chains whose event windows cannot yet prove fill-to-deposit
        /// completeness, with the window start that proved insufficient.
        invalid_start_blocks: BTreeMap<ChainId, BlockNumber>,
        /// Fetch rounds used.
        rounds: usize,
    },
}

impl RangeResolution {
    /// Resolved bundle block ranges.
    pub fn ranges(&self) -> &BundleBlockRanges {
        match self {
            Self::Converged { ranges, .. } | Self::Exhausted { ranges, .. } => ranges,
        }
    }

    /// The event snapshot backing the resolution.
    pub fn snapshot(&self) -> &EventSnapshot {
        match self {
            Self::Converged { snapshot, .. } | Self::Exhausted { snapshot, .. } => snapshot,
        }
    }

    /// Fetch rounds performed.
    pub fn rounds(&self) -> usize {
        match self {
            Self::Converged { rounds, .. } | Self::Exhausted { rounds, .. } => *rounds,
        }
    }

    /// Chains that cannot be reconstructed this iteration; empty when
    /// converged.
    pub fn invalid_chains(&self) -> Vec<ChainId> {
        match self {
            Self::Converged { .. } => Vec::new(),
            Self::Exhausted { invalid_start_blocks, .. } => {
                invalid_start_blocks.keys().copied().collect()
            }
        }
    }

    /// Whether every chain converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Whether `chain` may be used for proposal and validation this
    /// iteration.
    pub fn is_eligible(&self, chain: ChainId) -> bool {
        match self {
            Self::Converged { .. } => true,
            Self::Exhausted { invalid_start_blocks, .. } => {
                !invalid_start_blocks.contains_key(&chain)
            }
        }
    }
}

/// Resolves per-chain block ranges for the next bundle.
#[derive(Debug)]
pub struct RangeResolver<'a, S, H> {
    source: &'a S,
    hub: &'a H,
    config: &'a DataworkerConfig,
}

impl<'a, S: EventSource, H: HubReader> RangeResolver<'a, S, H> {
    /// Creates a new [`RangeResolver`].
    pub fn new(source: &'a S, hub: &'a H, config: &'a DataworkerConfig) -> Self {
        Self { source, hub, config }
    }

    /// Resolves ranges for the next bundle, widening the fetch window until
    /// every in-region fill matches a deposit or the retry ceiling is
    /// reached.
    ///
    /// Terminates within `max_retries + 1` fetch rounds for any input.
    pub async fn resolve(&self) -> Result<RangeResolution, SourceError> {
        let heads = self.fetch_heads().await?;
        let floor = self.hub.latest_fully_executed_bundle().await?.unwrap_or_default();
        let history = self.hub.validated_bundles().await?;

        let ranges = self.bundle_ranges(&heads, &floor);
        let floors = self.floor_blocks(&floor);

        let mut lookback = self.config.lookback;
        let mut rounds = 0usize;
        loop {
            let windows = self.fetch_windows(&history, &heads, lookback);
            let snapshot = fetch_snapshot(self.source, windows, heads.clone()).await?;
            rounds += 1;

            let invalid = self.invalid_start_blocks(&snapshot, &floors);
            if invalid.is_empty() {
                debug!(rounds, lookback, "block ranges converged");
                return Ok(RangeResolution::Converged { ranges, snapshot, rounds });
            }
            if rounds > self.config.max_retries {
                warn!(
                    rounds,
                    invalid_chains = ?invalid.keys().collect::<Vec<_>>(),
                    "lookback exhausted without convergence"
                );
                return Ok(RangeResolution::Exhausted {
                    ranges,
                    snapshot,
                    invalid_start_blocks: invalid,
                    rounds,
                });
            }

            info!(
                round = rounds,
                lookback,
                invalid_chains = ?invalid.keys().collect::<Vec<_>>(),
                "lookback insufficient, widening"
            );
            lookback = lookback.saturating_mul(self.config.retry_multiplier);
        }
    }

    /// Latest heads for all configured chains, fetched concurrently.
    async fn fetch_heads(&self) -> Result<BTreeMap<ChainId, BlockNumber>, SourceError> {
        let heads = try_join_all(self.config.chain_ids().map(|chain| async move {
            let head = self.source.latest_block(chain).await?;
            Ok::<_, SourceError>((chain, head))
        }))
        .await?;
        Ok(heads.into_iter().collect())
    }

    /// Bundle ranges: from the block after the executed floor up to the head
    /// minus the chain's confirmation buffer. The end never drops below the
    /// floor: a chain whose safe head has not yet cleared the last executed
    /// bundle gets an empty range anchored at the floor, so a proposal made
    /// around it can never commit an end block an executed bundle already
    /// covered.
    fn bundle_ranges(
        &self,
        heads: &BTreeMap<ChainId, BlockNumber>,
        floor: &BundleEndBlocks,
    ) -> BundleBlockRanges {
        self.config
            .chains
            .iter()
            .map(|(&chain, cfg)| {
                let from = floor.get(&chain).map(|end| end + 1).unwrap_or(cfg.deploy_block);
                let to = heads
                    .get(&chain)
                    .copied()
                    .unwrap_or(cfg.deploy_block)
                    .saturating_sub(cfg.confirmation_buffer)
                    .max(from.saturating_sub(1));
                (chain, BlockRange::new(from, to))
            })
            .collect()
    }

    /// Safe floor per chain: the executed bundle end, or the deploy block
    /// when no bundle executed yet.
    fn floor_blocks(&self, floor: &BundleEndBlocks) -> BTreeMap<ChainId, BlockNumber> {
        self.config
            .chains
            .iter()
            .map(|(&chain, cfg)| (chain, floor.get(&chain).copied().unwrap_or(cfg.deploy_block)))
            .collect()
    }

    /// Fetch windows reaching `lookback` executed bundles behind the latest,
    /// clamped to each chain's deploy block, and up to the observed head so
    /// that pending proposals beyond the confirmation buffer stay checkable.
    fn fetch_windows(
        &self,
        history: &[BundleEndBlocks],
        heads: &BTreeMap<ChainId, BlockNumber>,
        lookback: usize,
    ) -> BTreeMap<ChainId, BlockRange> {
        self.config
            .chains
            .iter()
            .map(|(&chain, cfg)| {
                let from = history
                    .len()
                    .checked_sub(lookback + 1)
                    .and_then(|idx| history.get(idx))
                    .and_then(|bundle| bundle.get(&chain))
                    .map(|end| (end + 1).max(cfg.deploy_block))
                    .unwrap_or(cfg.deploy_block);
                let to = heads.get(&chain).copied().unwrap_or(cfg.deploy_block);
                (chain, BlockRange::new(from, to))
            })
            .collect()
    }

    /// Per-chain invalid start blocks for one fetched snapshot.
    ///
    /// An unmatched fill above its destination chain's floor marks the
    /// **origin** chain with that chain's window start: the missing deposit
    /// must lie below it. Unmatched fills at or below the floor belong to
    /// already-settled bundles and are ignored. Once the origin window start
    /// reaches the deploy block the deposit provably does not exist; the fill
    /// is a garbage fill, excluded deterministically by the reconciliation
    /// engine rather than widened after.
    fn invalid_start_blocks(
        &self,
        snapshot: &EventSnapshot,
        floors: &BTreeMap<ChainId, BlockNumber>,
    ) -> BTreeMap<ChainId, BlockNumber> {
        let deposits = snapshot.deposit_index();
        let mut invalid: BTreeMap<ChainId, BlockNumber> = BTreeMap::new();
        let mut earliest_unmatched: BTreeMap<ChainId, BlockNumber> = BTreeMap::new();

        for fill in &snapshot.fills {
            if deposits.contains_key(&fill.deposit_key()) {
                continue;
            }
            earliest_unmatched
                .entry(fill.destination_chain_id)
                .and_modify(|block| *block = (*block).min(fill.destination_block))
                .or_insert(fill.destination_block);

            let Some(&floor) = floors.get(&fill.destination_chain_id) else { continue };
            if fill.destination_block <= floor {
                continue;
            }
            let Some(window) = snapshot.windows.get(&fill.origin_chain_id) else { continue };
            let Some(origin_cfg) = self.config.chain(fill.origin_chain_id) else { continue };
            if window.from <= origin_cfg.deploy_block {
                continue;
            }
            invalid
                .entry(fill.origin_chain_id)
                .and_modify(|block| *block = (*block).max(window.from))
                .or_insert(window.from);
        }

        if !earliest_unmatched.is_empty() {
            debug!(?earliest_unmatched, "unmatched fills observed");
        }
        invalid
    }
}
