//! Root bundle validation against recomputed trees.

use crate::{
    bundler::{build_bundle, BundleData, BundleError},
    config::DataworkerConfig,
    resolver::RangeResolution,
    types::{BlockRange, BundleBlockRanges, ProposedRootBundle},
};
use alloy::primitives::{B256, ChainId};
use std::collections::BTreeSet;
use strum::Display;
use tracing::{debug, warn};

/// Which of the three committed trees a mismatch was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RootKind {
    /// Pool rebalance tree.
    PoolRebalance,
    /// Relayer refund tree.
    RelayerRefund,
    /// Slow relay tree.
    SlowRelay,
}

/// Verdict on a pending root bundle.
///
/// `InvalidChainIdExcluded` is an abstention, not a finding: the bundle can
/// currently not be reproduced, and disputing on insufficient data risks an
/// incorrect dispute. Callers must only dispute on
/// [`BundleValidity::is_disputable`] verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleValidity {
    /// Recomputation reproduced the committed roots byte for byte.
    Ok,
    /// A recomputed root differs from the committed one.
    RootMismatch {
        /// Tree the mismatch was found in.
        tree: RootKind,
        /// Root committed by the proposer.
        committed: B256,
        /// Root recomputed from chain history.
        recomputed: B256,
    },
    /// The committed evaluation end blocks are not reproducible against chain
    /// history.
    BlockRangeMismatch {
        /// Human-readable explanation for logs and alerting.
        reason: String,
    },
    /// A chain required by the bundle is currently unreconstructable.
    InvalidChainIdExcluded {
        /// The affected chains.
        chains: Vec<ChainId>,
    },
}

impl BundleValidity {
    /// Whether the verdict justifies a dispute.
    pub fn is_disputable(&self) -> bool {
        matches!(self, Self::RootMismatch { .. } | Self::BlockRangeMismatch { .. })
    }

    /// Whether the bundle was reproduced exactly.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of validating one pending bundle.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The verdict.
    pub validity: BundleValidity,
    /// The recomputed bundle, present whenever validation got far enough to
    /// rebuild the trees. Reused for leaf execution when the verdict is ok.
    pub recomputed: Option<BundleData>,
}

/// Validates pending root bundles by recomputing them from chain history.
#[derive(Debug)]
pub struct BundleValidator<'a> {
    config: &'a DataworkerConfig,
}

impl<'a> BundleValidator<'a> {
    /// Creates a new [`BundleValidator`].
    pub fn new(config: &'a DataworkerConfig) -> Self {
        Self { config }
    }

    /// Validates `pending` against trees recomputed from the resolution's
    /// snapshot, using the bundle's **own committed end blocks** so the
    /// recomputation reproduces exactly what the proposer claimed.
    pub fn validate(
        &self,
        pending: &ProposedRootBundle,
        resolution: &RangeResolution,
    ) -> Result<ValidationOutcome, BundleError> {
        // Chains the proposer committed to must be exactly the configured set.
        let committed: BTreeSet<ChainId> = pending.end_blocks.keys().copied().collect();
        let configured: BTreeSet<ChainId> = self.config.chain_ids().collect();
        if committed != configured {
            return Ok(abstainless(BundleValidity::BlockRangeMismatch {
                reason: format!("committed chains {committed:?} != configured {configured:?}"),
            }));
        }

        // Abstain on chains we cannot currently reconstruct.
        let excluded: Vec<ChainId> =
            committed.iter().copied().filter(|&chain| !resolution.is_eligible(chain)).collect();
        if !excluded.is_empty() {
            debug!(chains = ?excluded, "abstaining, chains unreconstructable");
            return Ok(abstainless(BundleValidity::InvalidChainIdExcluded { chains: excluded }));
        }

        // End blocks must extend the executed floor and stay within observed
        // chain history.
        let snapshot = resolution.snapshot();
        let current = resolution.ranges();
        let mut validation_ranges = BundleBlockRanges::default();
        for (&chain, &end) in &pending.end_blocks {
            let Some(range) = current.get(chain) else {
                return Ok(abstainless(BundleValidity::BlockRangeMismatch {
                    reason: format!("no resolved range for chain {chain}"),
                }));
            };
            if end.saturating_add(1) < range.from {
                return Ok(abstainless(BundleValidity::BlockRangeMismatch {
                    reason: format!(
                        "chain {chain} end block {end} below executed floor {}",
                        range.from.saturating_sub(1)
                    ),
                }));
            }
            let Some(&head) = snapshot.heads.get(&chain) else {
                return Err(BundleError::MissingHead(chain));
            };
            if end > head {
                return Ok(abstainless(BundleValidity::BlockRangeMismatch {
                    reason: format!("chain {chain} end block {end} beyond observed head {head}"),
                }));
            }
            validation_ranges.0.insert(chain, BlockRange::new(range.from, end));
        }

        let recomputed = build_bundle(&validation_ranges, snapshot, &self.config.policy)?;

        let validity = compare_roots(pending, &recomputed);
        if let BundleValidity::RootMismatch { tree, committed, recomputed } = &validity {
            warn!(%tree, %committed, %recomputed, "pending bundle root mismatch");
        }
        Ok(ValidationOutcome { validity, recomputed: Some(recomputed) })
    }
}

fn abstainless(validity: BundleValidity) -> ValidationOutcome {
    ValidationOutcome { validity, recomputed: None }
}

/// Byte-for-byte comparison of committed and recomputed roots.
fn compare_roots(pending: &ProposedRootBundle, recomputed: &BundleData) -> BundleValidity {
    let committed = &pending.roots;
    let ours = &recomputed.roots;

    let checks = [
        (RootKind::PoolRebalance, committed.pool_rebalance_root, ours.pool_rebalance_root),
        (RootKind::RelayerRefund, committed.relayer_refund_root, ours.relayer_refund_root),
        (RootKind::SlowRelay, committed.slow_relay_root, ours.slow_relay_root),
    ];
    for (tree, theirs, ours) in checks {
        if theirs != ours {
            return BundleValidity::RootMismatch { tree, committed: theirs, recomputed: ours };
        }
    }
    if committed.pool_rebalance_leaf_count != ours.pool_rebalance_leaf_count {
        // Same root, different count: the commitment is still wrong on-chain.
        return BundleValidity::RootMismatch {
            tree: RootKind::PoolRebalance,
            committed: committed.pool_rebalance_root,
            recomputed: ours.pool_rebalance_root,
        };
    }
    BundleValidity::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundler::build_bundle,
        config::{BundlePolicy, ChainConfig},
        resolver::RangeResolution,
        sources::EventSnapshot,
        types::{BundleRoots, Deposit, Fill},
    };
    use alloy::primitives::{address, Address, U256};
    use std::{collections::BTreeMap, time::Duration};

    const CHAIN_A: ChainId = 1;
    const CHAIN_B: ChainId = 10;

    fn config() -> DataworkerConfig {
        let chain = |deploy| ChainConfig {
            spoke_pool: address!("00000000000000000000000000000000000000aa"),
            deploy_block: deploy,
            confirmation_buffer: 10,
        };
        DataworkerConfig {
            hub_chain_id: CHAIN_A,
            hub_pool: address!("00000000000000000000000000000000000000bb"),
            chains: BTreeMap::from([(CHAIN_A, chain(1)), (CHAIN_B, chain(1))]),
            lookback: 1,
            max_retries: 2,
            retry_multiplier: 2,
            propose_enabled: true,
            dispute_enabled: true,
            execute_enabled: true,
            poll_interval: Duration::from_secs(1),
            policy: BundlePolicy::default(),
        }
    }

    fn snapshot() -> EventSnapshot {
        let deposit = Deposit {
            origin_chain_id: CHAIN_A,
            destination_chain_id: CHAIN_B,
            depositor: Address::ZERO,
            token: address!("00000000000000000000000000000000000000cc"),
            amount: U256::from(500),
            deposit_id: 1,
            origin_block: 150,
        };
        let fill = Fill {
            destination_chain_id: CHAIN_B,
            origin_chain_id: CHAIN_A,
            deposit_id: 1,
            relayer: address!("00000000000000000000000000000000000000dd"),
            repayment_chain_id: CHAIN_B,
            token: address!("00000000000000000000000000000000000000cc"),
            amount: U256::from(500),
            destination_block: 350,
        };
        EventSnapshot {
            deposits: vec![deposit],
            fills: vec![fill],
            heads: BTreeMap::from([(CHAIN_A, 500), (CHAIN_B, 500)]),
            windows: BTreeMap::from([
                (CHAIN_A, BlockRange::new(1, 500)),
                (CHAIN_B, BlockRange::new(1, 500)),
            ]),
        }
    }

    fn resolution() -> RangeResolution {
        RangeResolution::Converged {
            ranges: BundleBlockRanges::from_iter([
                (CHAIN_A, BlockRange::new(100, 400)),
                (CHAIN_B, BlockRange::new(300, 400)),
            ]),
            snapshot: snapshot(),
            rounds: 1,
        }
    }

    fn honest_pending() -> ProposedRootBundle {
        let ranges = BundleBlockRanges::from_iter([
            (CHAIN_A, BlockRange::new(100, 400)),
            (CHAIN_B, BlockRange::new(300, 400)),
        ]);
        let bundle = build_bundle(&ranges, &snapshot(), &BundlePolicy::default()).unwrap();
        ProposedRootBundle {
            roots: bundle.roots,
            proposer: Address::ZERO,
            challenge_period_end: 1_000,
            end_blocks: ranges.end_blocks(),
            proposal_block: 123,
        }
    }

    #[test]
    fn honest_bundle_validates_ok() {
        let cfg = config();
        let outcome =
            BundleValidator::new(&cfg).validate(&honest_pending(), &resolution()).unwrap();
        assert_eq!(outcome.validity, BundleValidity::Ok);
        assert!(outcome.recomputed.is_some());
    }

    #[test]
    fn perturbed_root_is_a_root_mismatch() {
        let cfg = config();
        let mut pending = honest_pending();
        let mut bytes = pending.roots.relayer_refund_root.0;
        bytes[31] ^= 1;
        pending.roots.relayer_refund_root = B256::from(bytes);

        let outcome = BundleValidator::new(&cfg).validate(&pending, &resolution()).unwrap();
        match outcome.validity {
            BundleValidity::RootMismatch { tree, .. } => {
                assert_eq!(tree, RootKind::RelayerRefund);
            }
            other => panic!("expected root mismatch, got {other:?}"),
        }
        assert!(outcome.validity.is_disputable());
    }

    #[test]
    fn end_block_beyond_head_is_a_block_range_mismatch() {
        let cfg = config();
        let mut pending = honest_pending();
        pending.end_blocks.insert(CHAIN_B, 10_000);

        let outcome = BundleValidator::new(&cfg).validate(&pending, &resolution()).unwrap();
        assert!(matches!(outcome.validity, BundleValidity::BlockRangeMismatch { .. }));
    }

    #[test]
    fn hostile_max_end_block_is_rejected_without_panicking() {
        let cfg = config();
        let mut pending = honest_pending();
        pending.end_blocks.insert(CHAIN_B, u64::MAX);

        let outcome = BundleValidator::new(&cfg).validate(&pending, &resolution()).unwrap();
        assert!(matches!(outcome.validity, BundleValidity::BlockRangeMismatch { .. }));
    }

    #[test]
    fn missing_chain_is_a_block_range_mismatch() {
        let cfg = config();
        let mut pending = honest_pending();
        pending.end_blocks.remove(&CHAIN_B);

        let outcome = BundleValidator::new(&cfg).validate(&pending, &resolution()).unwrap();
        assert!(matches!(outcome.validity, BundleValidity::BlockRangeMismatch { .. }));
    }

    #[test]
    fn unreconstructable_chain_abstains() {
        let cfg = config();
        let resolution = RangeResolution::Exhausted {
            ranges: resolution().ranges().clone(),
            snapshot: snapshot(),
            invalid_start_blocks: BTreeMap::from([(CHAIN_A, 120)]),
            rounds: 3,
        };

        let outcome = BundleValidator::new(&cfg).validate(&honest_pending(), &resolution).unwrap();
        assert_eq!(
            outcome.validity,
            BundleValidity::InvalidChainIdExcluded { chains: vec![CHAIN_A] }
        );
        // An abstention never justifies a dispute.
        assert!(!outcome.validity.is_disputable());
    }
}
