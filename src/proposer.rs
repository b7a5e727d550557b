//! Proposal scheduling.

use crate::{
    bundler::BundleData,
    config::DataworkerConfig,
    resolver::RangeResolution,
    transactions::ContractCall,
    types::{BundleBlockRanges, IHubPool, ProposedRootBundle},
};
use alloy::sol_types::SolCall;
use tracing::debug;

/// Decides whether a new root bundle should be proposed and builds the
/// proposal call.
#[derive(Debug)]
pub struct Proposer<'a> {
    config: &'a DataworkerConfig,
}

impl<'a> Proposer<'a> {
    /// Creates a new [`Proposer`].
    pub fn new(config: &'a DataworkerConfig) -> Self {
        Self { config }
    }

    /// Propose only if no pending bundle exists, every chain resolved, and
    /// proposing is enabled.
    pub fn should_propose(
        &self,
        pending: Option<&ProposedRootBundle>,
        resolution: &RangeResolution,
    ) -> bool {
        if !self.config.propose_enabled {
            return false;
        }
        if pending.is_some() {
            debug!("not proposing, a bundle is already pending");
            return false;
        }
        if !resolution.is_converged() {
            debug!(chains = ?resolution.invalid_chains(), "not proposing, chains unreconstructable");
            return false;
        }
        if resolution.ranges().0.values().all(|range| range.is_empty()) {
            debug!("not proposing, no new blocks to bundle");
            return false;
        }
        true
    }

    /// Builds the hub pool proposal call. The evaluation end blocks in
    /// `ranges` become the immutable record other operators validate against.
    pub fn propose_call(&self, ranges: &BundleBlockRanges, bundle: &BundleData) -> ContractCall {
        let call = IHubPool::proposeRootBundleCall {
            bundleEvaluationBlockNumbers: ranges.0.values().map(|range| range.to).collect(),
            poolRebalanceLeafCount: bundle.roots.pool_rebalance_leaf_count,
            poolRebalanceRoot: bundle.roots.pool_rebalance_root,
            relayerRefundRoot: bundle.roots.relayer_refund_root,
            slowRelayRoot: bundle.roots.slow_relay_root,
        };
        ContractCall::new(self.config.hub_chain_id, self.config.hub_pool, call.abi_encode().into())
    }

    /// Builds the hub pool dispute call.
    pub fn dispute_call(&self) -> ContractCall {
        ContractCall::new(
            self.config.hub_chain_id,
            self.config.hub_pool,
            IHubPool::disputeRootBundleCall {}.abi_encode().into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BundlePolicy, ChainConfig},
        sources::EventSnapshot,
        types::{BlockRange, BundleRoots},
    };
    use alloy::primitives::{address, Address, B256, U256};
    use std::{collections::BTreeMap, time::Duration};

    fn config() -> DataworkerConfig {
        DataworkerConfig {
            hub_chain_id: 1,
            hub_pool: address!("00000000000000000000000000000000000000bb"),
            chains: BTreeMap::from([(
                1,
                ChainConfig {
                    spoke_pool: address!("00000000000000000000000000000000000000aa"),
                    deploy_block: 1,
                    confirmation_buffer: 10,
                },
            )]),
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

    fn converged() -> RangeResolution {
        RangeResolution::Converged {
            ranges: BundleBlockRanges::from_iter([(1, BlockRange::new(100, 200))]),
            snapshot: EventSnapshot::default(),
            rounds: 1,
        }
    }

    fn pending() -> ProposedRootBundle {
        ProposedRootBundle {
            roots: BundleRoots {
                pool_rebalance_root: B256::ZERO,
                relayer_refund_root: B256::ZERO,
                slow_relay_root: B256::ZERO,
                pool_rebalance_leaf_count: 0,
            },
            proposer: Address::ZERO,
            challenge_period_end: 0,
            end_blocks: BTreeMap::new(),
            proposal_block: 0,
        }
    }

    #[test]
    fn proposes_when_converged_and_idle() {
        let cfg = config();
        assert!(Proposer::new(&cfg).should_propose(None, &converged()));
    }

    #[test]
    fn never_proposes_over_a_pending_bundle() {
        let cfg = config();
        assert!(!Proposer::new(&cfg).should_propose(Some(&pending()), &converged()));
    }

    #[test]
    fn never_proposes_on_exhaustion() {
        let cfg = config();
        let exhausted = RangeResolution::Exhausted {
            ranges: converged().ranges().clone(),
            snapshot: EventSnapshot::default(),
            invalid_start_blocks: BTreeMap::from([(1, 50)]),
            rounds: 3,
        };
        assert!(!Proposer::new(&cfg).should_propose(None, &exhausted));
    }

    #[test]
    fn respects_the_config_flag() {
        let mut cfg = config();
        cfg.propose_enabled = false;
        assert!(!Proposer::new(&cfg).should_propose(None, &converged()));
    }

    #[test]
    fn proposal_call_commits_end_blocks_in_canonical_order() {
        let cfg = config();
        let ranges = BundleBlockRanges::from_iter([(1, BlockRange::new(100, 200))]);
        let bundle = BundleData {
            pool_rebalance_leaves: vec![],
            relayer_refund_leaves: vec![],
            slow_relay_leaves: vec![],
            roots: BundleRoots {
                pool_rebalance_root: B256::with_last_byte(1),
                relayer_refund_root: B256::with_last_byte(2),
                slow_relay_root: B256::with_last_byte(3),
                pool_rebalance_leaf_count: 0,
            },
        };
        let call = Proposer::new(&cfg).propose_call(&ranges, &bundle);
        assert_eq!(call.chain_id, cfg.hub_chain_id);
        assert_eq!(call.target, cfg.hub_pool);
        assert_eq!(call.value, U256::ZERO);

        let decoded = IHubPool::proposeRootBundleCall::abi_decode(&call.calldata).unwrap();
        assert_eq!(decoded.bundleEvaluationBlockNumbers, vec![200]);
        assert_eq!(decoded.poolRebalanceRoot, B256::with_last_byte(1));
    }
}
