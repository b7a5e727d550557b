//! External collaborator interfaces and the per-iteration event snapshot.

use crate::types::{
    BlockRange, BundleEndBlocks, Deposit, DepositKey, Fill, ProposedRootBundle,
};
use alloy::primitives::{Address, BlockNumber, ChainId, U256};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::collections::BTreeMap;

/// Errors surfaced by external data collaborators.
///
/// Transient I/O failures are retried by the collaborators themselves; by the
/// time one of these reaches the dataworker it is terminal for the current
/// iteration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Event or head data for a chain could not be fetched.
    #[error("data unavailable for chain {chain}: {reason}")]
    DataUnavailable {
        /// Chain the fetch failed for.
        chain: ChainId,
        /// Collaborator-provided failure description.
        reason: String,
    },
    /// Hub chain state could not be read.
    #[error("hub state unavailable: {0}")]
    HubUnavailable(String),
}

/// Per-chain event log access.
#[async_trait]
pub trait EventSource: Send + Sync + std::fmt::Debug {
    /// Deposit events on `chain` within the inclusive block range.
    async fn deposits(
        &self,
        chain: ChainId,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Deposit>, SourceError>;

    /// Fill events on `chain` within the inclusive block range.
    async fn fills(
        &self,
        chain: ChainId,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Fill>, SourceError>;

    /// Latest known block on `chain`.
    async fn latest_block(&self, chain: ChainId) -> Result<BlockNumber, SourceError>;
}

/// Hub chain state reader. On-chain storage is the source of truth; nothing
/// is persisted locally.
#[async_trait]
pub trait HubReader: Send + Sync + std::fmt::Debug {
    /// End blocks of the most recently fully executed bundle, the known-safe
    /// floor. `None` before the first bundle executes.
    async fn latest_fully_executed_bundle(&self) -> Result<Option<BundleEndBlocks>, SourceError>;

    /// End blocks of every fully executed bundle, oldest first. The last
    /// entry equals [`Self::latest_fully_executed_bundle`].
    async fn validated_bundles(&self) -> Result<Vec<BundleEndBlocks>, SourceError>;

    /// The currently pending (unexecuted, undisputed) proposal, if any.
    async fn pending_bundle(&self) -> Result<Option<ProposedRootBundle>, SourceError>;

    /// Current hub time in unix seconds, used to check challenge periods.
    async fn current_time(&self) -> Result<u64, SourceError>;
}

/// Read-only balance source the allocator layers reservations on.
#[async_trait]
pub trait BalanceSource: Send + Sync + std::fmt::Debug {
    /// Spendable balance of `token` on `chain` as currently known on-chain.
    async fn available_balance(
        &self,
        chain: ChainId,
        token: Address,
    ) -> Result<U256, SourceError>;
}

/// One internally consistent multi-chain fetch result.
///
/// Every chain's events and head are gathered before any reconciliation
/// begins; a snapshot is never extended in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSnapshot {
    /// All deposits observed within the fetch windows.
    pub deposits: Vec<Deposit>,
    /// All fills observed within the fetch windows.
    pub fills: Vec<Fill>,
    /// Latest observed head per chain.
    pub heads: BTreeMap<ChainId, BlockNumber>,
    /// The windows events were fetched over. Wider than the bundle ranges so
    /// that old deposits can match recent fills.
    pub windows: BTreeMap<ChainId, BlockRange>,
}

impl EventSnapshot {
    /// Deposits indexed by their resolution key.
    pub fn deposit_index(&self) -> BTreeMap<DepositKey, &Deposit> {
        self.deposits.iter().map(|deposit| (deposit.key(), deposit)).collect()
    }
}

/// Fetches all chains' events over `windows` concurrently.
///
/// Fan-out/fan-in: per-chain fetches are independent I/O and run at the same
/// time, but the snapshot is only assembled once every chain has answered.
pub async fn fetch_snapshot<S: EventSource + ?Sized>(
    source: &S,
    windows: BTreeMap<ChainId, BlockRange>,
    heads: BTreeMap<ChainId, BlockNumber>,
) -> Result<EventSnapshot, SourceError> {
    let fetches = windows.iter().map(|(&chain, range)| {
        let (from, to) = (range.from, range.to);
        async move {
            let (deposits, fills) =
                tokio::try_join!(source.deposits(chain, from, to), source.fills(chain, from, to))?;
            Ok::<_, SourceError>((deposits, fills))
        }
    });

    let mut snapshot =
        EventSnapshot { heads, windows: windows.clone(), ..Default::default() };
    for (deposits, fills) in try_join_all(fetches).await? {
        snapshot.deposits.extend(deposits);
        snapshot.fills.extend(fills);
    }

    // A stable event ordering keeps downstream aggregation independent of
    // per-chain arrival order.
    snapshot.deposits.sort_by_key(|d| (d.origin_chain_id, d.deposit_id, d.origin_block));
    snapshot.fills.sort_by_key(|f| {
        (f.destination_chain_id, f.destination_block, f.origin_chain_id, f.deposit_id)
    });

    Ok(snapshot)
}
