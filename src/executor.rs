//! Leaf execution under a virtual balance budget.
//!
//! The allocator ledger is created at the start of one execution pass and
//! discarded with it, bounding the blast radius of a stale balance read to a
//! single iteration. It is mutated strictly sequentially: pool rebalance
//! leaves first, then slow relay leaves, then relayer refund leaves.

use crate::{
    bundler::BundleData,
    config::DataworkerConfig,
    merkle::{MerkleError, MerkleTree},
    sources::{BalanceSource, SourceError},
    transactions::{CallId, ContractCall, QueueError, TransactionQueue},
    types::{
        ChainToken, IHubPool, ISpokePool, PoolRebalanceLeaf, RelayerRefundLeaf, SlowRelayLeaf,
    },
};
use alloy::{
    primitives::{Address, ChainId, U256},
    sol_types::SolCall,
};
use futures_util::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use strum::Display;
use tracing::{debug, warn};

/// Errors aborting an execution pass.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A leaf targets a chain with no configuration.
    #[error("no configuration for chain {0}")]
    UnknownChain(ChainId),
    /// Proof generation failed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The submission queue rejected a call.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Balance reads failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Iteration-scoped virtual balance ledger.
///
/// Reservations layer on top of balances read once at pass start; the ledger
/// never requests more than that reading allows, regardless of what is
/// concurrently queued.
#[derive(Debug, Default)]
pub struct BalanceAllocator {
    available: BTreeMap<ChainToken, U256>,
    reserved: BTreeMap<ChainToken, U256>,
}

impl BalanceAllocator {
    /// Seeds the ledger for `keys` from the balance source, all reads fanned
    /// out concurrently.
    pub async fn seed<B: BalanceSource + ?Sized>(
        source: &B,
        keys: BTreeSet<ChainToken>,
    ) -> Result<Self, SourceError> {
        let balances = try_join_all(keys.into_iter().map(|(chain, token)| async move {
            let balance = source.available_balance(chain, token).await?;
            Ok::<_, SourceError>(((chain, token), balance))
        }))
        .await?;
        Ok(Self { available: balances.into_iter().collect(), reserved: BTreeMap::new() })
    }

    /// Remaining virtual balance for `(chain, token)`.
    pub fn remaining(&self, chain: ChainId, token: Address) -> U256 {
        let available = self.available.get(&(chain, token)).copied().unwrap_or(U256::ZERO);
        let reserved = self.reserved.get(&(chain, token)).copied().unwrap_or(U256::ZERO);
        available.saturating_sub(reserved)
    }

    /// Total reserved so far for `(chain, token)`.
    pub fn reserved(&self, chain: ChainId, token: Address) -> U256 {
        self.reserved.get(&(chain, token)).copied().unwrap_or(U256::ZERO)
    }

    /// Reserves `amount` against `(chain, token)` if the remaining virtual
    /// balance covers it.
    pub fn try_reserve(&mut self, chain: ChainId, token: Address, amount: U256) -> bool {
        if self.remaining(chain, token) < amount {
            return false;
        }
        let slot = self.reserved.entry((chain, token)).or_insert(U256::ZERO);
        *slot = slot.saturating_add(amount);
        true
    }

    /// Reserves every `(token, amount)` requirement or none of them.
    fn try_reserve_all(
        &mut self,
        chain: ChainId,
        requirements: &[(Address, U256)],
    ) -> bool {
        // Requirements within one leaf never repeat a token, so checking
        // before reserving cannot double-count.
        if requirements.iter().any(|&(token, amount)| self.remaining(chain, token) < amount) {
            return false;
        }
        for &(token, amount) in requirements {
            self.try_reserve(chain, token, amount);
        }
        true
    }
}

/// Kind of a bundle leaf, in execution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LeafKind {
    /// Pool rebalance leaf, executed on the hub.
    PoolRebalance,
    /// Slow relay leaf, executed on the destination spoke.
    SlowRelay,
    /// Relayer refund leaf, executed on the refund spoke.
    RelayerRefund,
}

/// A leaf skipped for insufficient virtual balance; retried next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLeaf {
    /// Kind of the skipped leaf.
    pub kind: LeafKind,
    /// Chain the leaf would have executed on.
    pub chain_id: ChainId,
    /// Token the reservation failed for.
    pub token: Address,
    /// Amount that could not be reserved.
    pub required: U256,
}

/// Result of one execution pass.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Calls queued for submission.
    pub queued: Vec<CallId>,
    /// Leaves skipped this pass.
    pub skipped: Vec<SkippedLeaf>,
}

/// Executes approved bundle leaves within the allocator's budget.
#[derive(Debug)]
pub struct ExecutionOrchestrator<'a> {
    config: &'a DataworkerConfig,
}

impl<'a> ExecutionOrchestrator<'a> {
    /// Creates a new [`ExecutionOrchestrator`].
    pub fn new(config: &'a DataworkerConfig) -> Self {
        Self { config }
    }

    /// Every `(chain, token)` the bundle draws on; used to seed the
    /// allocator.
    pub fn balance_keys(&self, bundle: &BundleData) -> BTreeSet<ChainToken> {
        let hub = self.config.hub_chain_id;
        let mut keys = BTreeSet::new();
        for leaf in &bundle.pool_rebalance_leaves {
            keys.extend(leaf.hub_outflows().map(|(token, _)| (hub, token)));
        }
        for leaf in &bundle.slow_relay_leaves {
            keys.insert((leaf.destination_chain_id, leaf.token));
        }
        for leaf in &bundle.relayer_refund_leaves {
            keys.insert((leaf.chain_id, leaf.token));
        }
        keys
    }

    /// Executes the bundle's leaves in fixed priority order: pool rebalance,
    /// then slow relay (so slow-path recipients are not starved by refunds),
    /// then relayer refund. Leaves that do not fit the budget are skipped and
    /// reported, never retried within the same pass.
    pub async fn execute_bundle<Q: TransactionQueue + ?Sized>(
        &self,
        bundle: &BundleData,
        allocator: &mut BalanceAllocator,
        queue: &Q,
    ) -> Result<ExecutionReport, ExecutorError> {
        let mut report = ExecutionReport::default();

        self.execute_pool_rebalance(bundle, allocator, queue, &mut report).await?;
        self.execute_slow_relays(bundle, allocator, queue, &mut report).await?;
        self.execute_relayer_refunds(bundle, allocator, queue, &mut report).await?;

        debug!(queued = report.queued.len(), skipped = report.skipped.len(), "execution pass done");
        Ok(report)
    }

    async fn execute_pool_rebalance<Q: TransactionQueue + ?Sized>(
        &self,
        bundle: &BundleData,
        allocator: &mut BalanceAllocator,
        queue: &Q,
        report: &mut ExecutionReport,
    ) -> Result<(), ExecutorError> {
        let Some(tree) = tree_of(&bundle.pool_rebalance_leaves, PoolRebalanceLeaf::hash)? else {
            return Ok(());
        };
        let hub = self.config.hub_chain_id;

        for (index, leaf) in bundle.pool_rebalance_leaves.iter().enumerate() {
            let requirements: Vec<_> = leaf.hub_outflows().collect();
            if !allocator.try_reserve_all(hub, &requirements) {
                let (token, required) = first_unmet(allocator, hub, &requirements);
                skip(report, LeafKind::PoolRebalance, hub, token, required);
                continue;
            }

            let call = IHubPool::executeRootBundleCall {
                chainId: leaf.chain_id,
                leafId: leaf.leaf_id,
                tokens: leaf.tokens.clone(),
                netSendAmounts: leaf.net_send_amounts.clone(),
                runningBalances: leaf.running_balances.clone(),
                proof: tree.proof(index)?,
            };
            let call = ContractCall::new(hub, self.config.hub_pool, call.abi_encode().into());
            report.queued.push(call.id);
            queue.enqueue(call).await?;
        }
        Ok(())
    }

    async fn execute_slow_relays<Q: TransactionQueue + ?Sized>(
        &self,
        bundle: &BundleData,
        allocator: &mut BalanceAllocator,
        queue: &Q,
        report: &mut ExecutionReport,
    ) -> Result<(), ExecutorError> {
        let Some(tree) = tree_of(&bundle.slow_relay_leaves, SlowRelayLeaf::hash)? else {
            return Ok(());
        };

        for (index, leaf) in bundle.slow_relay_leaves.iter().enumerate() {
            let chain = leaf.destination_chain_id;
            let spoke = self.spoke_pool(chain)?;
            if !allocator.try_reserve(chain, leaf.token, leaf.amount) {
                skip(report, LeafKind::SlowRelay, chain, leaf.token, leaf.amount);
                continue;
            }

            let call = ISpokePool::executeSlowRelayLeafCall {
                originChainId: leaf.origin_chain_id,
                depositId: leaf.deposit_id,
                destinationChainId: leaf.destination_chain_id,
                depositor: leaf.depositor,
                token: leaf.token,
                amount: leaf.amount,
                proof: tree.proof(index)?,
            };
            let call = ContractCall::new(chain, spoke, call.abi_encode().into());
            report.queued.push(call.id);
            queue.enqueue(call).await?;
        }
        Ok(())
    }

    async fn execute_relayer_refunds<Q: TransactionQueue + ?Sized>(
        &self,
        bundle: &BundleData,
        allocator: &mut BalanceAllocator,
        queue: &Q,
        report: &mut ExecutionReport,
    ) -> Result<(), ExecutorError> {
        let Some(tree) = tree_of(&bundle.relayer_refund_leaves, RelayerRefundLeaf::hash)? else {
            return Ok(());
        };

        for (index, leaf) in bundle.relayer_refund_leaves.iter().enumerate() {
            let spoke = self.spoke_pool(leaf.chain_id)?;
            let required = leaf.total_refund_amount();
            if !allocator.try_reserve(leaf.chain_id, leaf.token, required) {
                skip(report, LeafKind::RelayerRefund, leaf.chain_id, leaf.token, required);
                continue;
            }

            let call = ISpokePool::executeRelayerRefundLeafCall {
                chainId: leaf.chain_id,
                token: leaf.token,
                leafId: leaf.leaf_id,
                slowRelayAmount: leaf.slow_relay_amount,
                refundAddresses: leaf.refund_addresses.clone(),
                refundAmounts: leaf.refund_amounts.clone(),
                proof: tree.proof(index)?,
            };
            let call = ContractCall::new(leaf.chain_id, spoke, call.abi_encode().into());
            report.queued.push(call.id);
            queue.enqueue(call).await?;
        }
        Ok(())
    }

    fn spoke_pool(&self, chain: ChainId) -> Result<Address, ExecutorError> {
        self.config
            .chain(chain)
            .map(|cfg| cfg.spoke_pool)
            .ok_or(ExecutorError::UnknownChain(chain))
    }
}

/// Tree over the leaf hashes, or `None` when there is nothing to execute.
fn tree_of<L>(leaves: &[L], hash: impl Fn(&L) -> alloy::primitives::B256) -> Result<Option<MerkleTree>, MerkleError> {
    if leaves.is_empty() {
        return Ok(None);
    }
    MerkleTree::new(leaves.iter().map(hash).collect()).map(Some)
}

fn first_unmet(
    allocator: &BalanceAllocator,
    chain: ChainId,
    requirements: &[(Address, U256)],
) -> (Address, U256) {
    requirements
        .iter()
        .copied()
        .find(|&(token, amount)| allocator.remaining(chain, token) < amount)
        .unwrap_or((Address::ZERO, U256::ZERO))
}

fn skip(report: &mut ExecutionReport, kind: LeafKind, chain: ChainId, token: Address, required: U256) {
    warn!(%kind, chain_id = chain, %token, %required, "leaf skipped, insufficient virtual balance");
    report.skipped.push(SkippedLeaf { kind, chain_id: chain, token, required });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundler::build_bundle,
        config::{BundlePolicy, ChainConfig, DataworkerConfig},
        sources::EventSnapshot,
        transactions::CallBuffer,
        types::{BlockRange, BundleBlockRanges, Deposit, Fill},
    };
    use alloy::primitives::address;
    use async_trait::async_trait;
    use std::time::Duration;

    const CHAIN_A: ChainId = 1;
    const CHAIN_B: ChainId = 10;

    #[derive(Debug)]
    struct MockBalances(BTreeMap<ChainToken, U256>);

    #[async_trait]
    impl BalanceSource for MockBalances {
        async fn available_balance(
            &self,
            chain: ChainId,
            token: Address,
        ) -> Result<U256, SourceError> {
            Ok(self.0.get(&(chain, token)).copied().unwrap_or(U256::ZERO))
        }
    }

    fn token() -> Address {
        address!("00000000000000000000000000000000000000cc")
    }

    fn config() -> DataworkerConfig {
        let chain = |_| ChainConfig {
            spoke_pool: address!("00000000000000000000000000000000000000aa"),
            deploy_block: 1,
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

    /// One matched fill (refund on B) plus one unfilled deposit (slow relay
    /// on B).
    fn bundle() -> crate::bundler::BundleData {
        let deposits = vec![
            Deposit {
                origin_chain_id: CHAIN_A,
                destination_chain_id: CHAIN_B,
                depositor: Address::ZERO,
                token: token(),
                amount: U256::from(500),
                deposit_id: 1,
                origin_block: 150,
            },
            Deposit {
                origin_chain_id: CHAIN_A,
                destination_chain_id: CHAIN_B,
                depositor: Address::ZERO,
                token: token(),
                amount: U256::from(200),
                deposit_id: 2,
                origin_block: 160,
            },
        ];
        let fills = vec![Fill {
            destination_chain_id: CHAIN_B,
            origin_chain_id: CHAIN_A,
            deposit_id: 1,
            relayer: address!("00000000000000000000000000000000000000dd"),
            repayment_chain_id: CHAIN_B,
            token: token(),
            amount: U256::from(500),
            destination_block: 350,
        }];
        let ranges = BundleBlockRanges::from_iter([
            (CHAIN_A, BlockRange::new(100, 200)),
            (CHAIN_B, BlockRange::new(300, 400)),
        ]);
        let snapshot = EventSnapshot {
            deposits,
            fills,
            heads: BTreeMap::from([(CHAIN_A, 500), (CHAIN_B, 500)]),
            windows: BTreeMap::from([
                (CHAIN_A, BlockRange::new(1, 500)),
                (CHAIN_B, BlockRange::new(1, 500)),
            ]),
        };
        build_bundle(&ranges, &snapshot, &BundlePolicy::default()).unwrap()
    }

    #[tokio::test]
    async fn reservations_never_exceed_seeded_balance() {
        let mut allocator = BalanceAllocator::seed(
            &MockBalances(BTreeMap::from([((CHAIN_B, token()), U256::from(600))])),
            BTreeSet::from([(CHAIN_B, token())]),
        )
        .await
        .unwrap();

        assert!(allocator.try_reserve(CHAIN_B, token(), U256::from(400)));
        assert!(allocator.try_reserve(CHAIN_B, token(), U256::from(200)));
        assert!(!allocator.try_reserve(CHAIN_B, token(), U256::from(1)));
        assert_eq!(allocator.reserved(CHAIN_B, token()), U256::from(600));
        assert_eq!(allocator.remaining(CHAIN_B, token()), U256::ZERO);
    }

    #[tokio::test]
    async fn full_budget_executes_everything_in_order() {
        let cfg = config();
        let bundle = bundle();
        let orchestrator = ExecutionOrchestrator::new(&cfg);

        let balances = MockBalances(BTreeMap::from([
            ((CHAIN_A, token()), U256::from(1_000)),
            ((CHAIN_B, token()), U256::from(1_000)),
        ]));
        let mut allocator =
            BalanceAllocator::seed(&balances, orchestrator.balance_keys(&bundle)).await.unwrap();

        let queue = CallBuffer::default();
        let report = orchestrator.execute_bundle(&bundle, &mut allocator, &queue).await.unwrap();

        assert!(report.skipped.is_empty());
        let expected = bundle.pool_rebalance_leaves.len()
            + bundle.slow_relay_leaves.len()
            + bundle.relayer_refund_leaves.len();
        assert_eq!(report.queued.len(), expected);
        assert_eq!(queue.queued().len(), expected);
    }

    #[tokio::test]
    async fn refunds_are_skipped_when_budget_runs_out() {
        let cfg = config();
        let bundle = bundle();
        let orchestrator = ExecutionOrchestrator::new(&cfg);

        // Chain B can fund the slow relay (200) but not also the 500 refund.
        let balances = MockBalances(BTreeMap::from([
            ((CHAIN_A, token()), U256::from(1_000)),
            ((CHAIN_B, token()), U256::from(300)),
        ]));
        let mut allocator =
            BalanceAllocator::seed(&balances, orchestrator.balance_keys(&bundle)).await.unwrap();

        let queue = CallBuffer::default();
        let report = orchestrator.execute_bundle(&bundle, &mut allocator, &queue).await.unwrap();

        // Slow relay executed first, refund leaf skipped and reported.
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].kind, LeafKind::RelayerRefund);
        assert_eq!(report.skipped[0].chain_id, CHAIN_B);
        assert_eq!(report.skipped[0].required, U256::from(500));
        assert_eq!(allocator.reserved(CHAIN_B, token()), U256::from(200));
    }
}
