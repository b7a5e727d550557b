//! Reconciliation engine: recomputes bundle leaves and roots from raw event
//! streams.
//!
//! [`build_bundle`] is a pure function of (block ranges, event snapshot,
//! policy). Identical inputs always yield identical leaf orderings and
//! identical roots; independent operators must reach the same root to agree
//! off-chain before an on-chain dispute. All grouping therefore runs over
//! [`BTreeMap`]s keyed by the stable sort key (chain id, token, relayer) and
//! never over hash-iteration order.

use crate::{
    config::BundlePolicy,
    merkle,
    sources::EventSnapshot,
    types::{
        BundleBlockRanges, BundleRoots, ChainToken, DepositKey, PoolRebalanceLeaf,
        RelayerRefundLeaf, SlowRelayLeaf,
    },
};
use alloy::primitives::{Address, ChainId, I256, U256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Errors failing a whole bundle computation.
///
/// The engine never emits a partial tree: any of these aborts the bundle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    /// A chain named by the ranges has no observed head in the snapshot.
    #[error("no head observed for chain {0}")]
    MissingHead(ChainId),
    /// An aggregate amount left the representable domain.
    #[error("amount overflow for token {token} on chain {chain}")]
    AmountOverflow {
        /// Chain the aggregation was for.
        chain: ChainId,
        /// Token the aggregation was for.
        token: Address,
    },
    /// Merkle commitment failed.
    #[error(transparent)]
    Merkle(#[from] merkle::MerkleError),
}

/// Leaves and roots recomputed for one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleData {
    /// Pool rebalance leaves, ordered by (chain id, leaf id).
    pub pool_rebalance_leaves: Vec<PoolRebalanceLeaf>,
    /// Relayer refund leaves, ordered by (chain id, token, leaf id).
    pub relayer_refund_leaves: Vec<RelayerRefundLeaf>,
    /// Slow relay leaves, ordered by (destination chain, token, origin chain,
    /// deposit id).
    pub slow_relay_leaves: Vec<SlowRelayLeaf>,
    /// Roots committing the three leaf sets.
    pub roots: BundleRoots,
}

/// Recomputes the bundle covering `ranges` from `snapshot`.
///
/// Policy:
/// - a fill contributes refunds only if its deposit is observed anywhere in
///   the snapshot and it falls inside its destination chain's bundle range;
///   otherwise it is excluded this bundle,
/// - a deposit inside its origin range with no fill inside its destination
///   chain's bundle range, whose destination chain is covered by `ranges`,
///   yields a slow relay leaf,
/// - net amounts below the dust threshold are carried as running balances
///   instead of being rebalanced; refunds still settle,
/// - leaves exceeding the per-leaf caps split at the stable sort key, never
///   drop entries.
pub fn build_bundle(
    ranges: &BundleBlockRanges,
    snapshot: &EventSnapshot,
    policy: &BundlePolicy,
) -> Result<BundleData, BundleError> {
    for chain in ranges.chains() {
        if !snapshot.heads.contains_key(&chain) {
            return Err(BundleError::MissingHead(chain));
        }
    }

    let deposits = snapshot.deposit_index();
    // A fill beyond its destination chain's bundle range settles in a later
    // bundle; it must not suppress this bundle's slow relay, or two operators
    // observing different heads would disagree on the roots.
    let filled: BTreeSet<DepositKey> = snapshot
        .fills
        .iter()
        .filter(|fill| {
            ranges
                .get(fill.destination_chain_id)
                .is_some_and(|range| range.contains(fill.destination_block))
        })
        .map(|fill| fill.deposit_key())
        .collect();

    // (chain, token) -> net delta owed by the hub to that chain.
    let mut running: BTreeMap<ChainToken, I256> = BTreeMap::new();
    // (chain, token) -> relayer -> refund owed.
    let mut refunds: BTreeMap<ChainToken, BTreeMap<Address, U256>> = BTreeMap::new();
    // (chain, token) -> slow-path liquidity to release.
    let mut slow_amounts: BTreeMap<ChainToken, U256> = BTreeMap::new();

    for fill in &snapshot.fills {
        let Some(range) = ranges.get(fill.destination_chain_id) else { continue };
        if !range.contains(fill.destination_block) {
            continue;
        }
        let Some(deposit) = deposits.get(&fill.deposit_key()) else {
            debug!(
                chain_id = fill.destination_chain_id,
                origin_chain_id = fill.origin_chain_id,
                deposit_id = fill.deposit_id,
                "fill excluded, deposit unobserved"
            );
            continue;
        };
        // Both accounting sides must be part of this bundle.
        if ranges.get(fill.repayment_chain_id).is_none()
            || ranges.get(deposit.origin_chain_id).is_none()
        {
            continue;
        }

        let refund = refunds
            .entry((fill.repayment_chain_id, fill.token))
            .or_default()
            .entry(fill.relayer)
            .or_insert(U256::ZERO);
        *refund = refund.checked_add(fill.amount).ok_or(BundleError::AmountOverflow {
            chain: fill.repayment_chain_id,
            token: fill.token,
        })?;

        // The hub reimburses the repayment chain and collects on the origin.
        accrue(&mut running, fill.repayment_chain_id, fill.token, Sign::Add, fill.amount)?;
        accrue(&mut running, deposit.origin_chain_id, deposit.token, Sign::Sub, deposit.amount)?;
    }

    let mut slow_relay_leaves = Vec::new();
    for deposit in &snapshot.deposits {
        let Some(origin_range) = ranges.get(deposit.origin_chain_id) else { continue };
        if !origin_range.contains(deposit.origin_block) || filled.contains(&deposit.key()) {
            continue;
        }
        // Without a resolved range on the destination chain the fast-path
        // window has not demonstrably elapsed; the deposit waits.
        if ranges.get(deposit.destination_chain_id).is_none() {
            continue;
        }

        slow_relay_leaves.push(SlowRelayLeaf {
            origin_chain_id: deposit.origin_chain_id,
            deposit_id: deposit.deposit_id,
            destination_chain_id: deposit.destination_chain_id,
            depositor: deposit.depositor,
            token: deposit.token,
            amount: deposit.amount,
        });

        let key = (deposit.destination_chain_id, deposit.token);
        let slot = slow_amounts.entry(key).or_insert(U256::ZERO);
        *slot = slot
            .checked_add(deposit.amount)
            .ok_or(BundleError::AmountOverflow { chain: key.0, token: key.1 })?;
        // The hub fronts the slow fill on the destination chain.
        accrue(&mut running, key.0, key.1, Sign::Add, deposit.amount)?;
    }
    slow_relay_leaves.sort_by_key(|leaf| {
        (leaf.destination_chain_id, leaf.token, leaf.origin_chain_id, leaf.deposit_id)
    });

    let pool_rebalance_leaves = pool_rebalance_leaves(&running, policy);
    let relayer_refund_leaves = relayer_refund_leaves(&refunds, &slow_amounts, policy);

    let roots = BundleRoots {
        pool_rebalance_root: merkle::commit(
            pool_rebalance_leaves.iter().map(PoolRebalanceLeaf::hash).collect(),
        )?,
        relayer_refund_root: merkle::commit(
            relayer_refund_leaves.iter().map(RelayerRefundLeaf::hash).collect(),
        )?,
        slow_relay_root: merkle::commit(
            slow_relay_leaves.iter().map(SlowRelayLeaf::hash).collect(),
        )?,
        pool_rebalance_leaf_count: pool_rebalance_leaves.len() as u32,
    };

    Ok(BundleData { pool_rebalance_leaves, relayer_refund_leaves, slow_relay_leaves, roots })
}

#[derive(Clone, Copy)]
enum Sign {
    Add,
    Sub,
}

fn accrue(
    running: &mut BTreeMap<ChainToken, I256>,
    chain: ChainId,
    token: Address,
    sign: Sign,
    amount: U256,
) -> Result<(), BundleError> {
    let overflow = || BundleError::AmountOverflow { chain, token };
    let delta = I256::try_from(amount).map_err(|_| overflow())?;
    let slot = running.entry((chain, token)).or_insert(I256::ZERO);
    *slot = match sign {
        Sign::Add => slot.checked_add(delta),
        Sign::Sub => slot.checked_sub(delta),
    }
    .ok_or_else(overflow)?;
    Ok(())
}

/// Groups running balances into per-chain leaves, applying dust suppression
/// and the token cap.
fn pool_rebalance_leaves(
    running: &BTreeMap<ChainToken, I256>,
    policy: &BundlePolicy,
) -> Vec<PoolRebalanceLeaf> {
    let mut per_chain: BTreeMap<ChainId, Vec<(Address, I256, I256)>> = BTreeMap::new();
    for (&(chain, token), &balance) in running {
        if balance.is_zero() {
            continue;
        }
        let (net, carry) = if balance.unsigned_abs() >= policy.dust_threshold_for(token) {
            (balance, I256::ZERO)
        } else {
            (I256::ZERO, balance)
        };
        per_chain.entry(chain).or_default().push((token, net, carry));
    }

    let mut leaves = Vec::new();
    for (chain, entries) in per_chain {
        for (leaf_id, chunk) in entries.chunks(policy.max_tokens_per_pool_leaf).enumerate() {
            leaves.push(PoolRebalanceLeaf {
                chain_id: chain,
                leaf_id: leaf_id as u32,
                tokens: chunk.iter().map(|(token, ..)| *token).collect(),
                net_send_amounts: chunk.iter().map(|(_, net, _)| *net).collect(),
                running_balances: chunk.iter().map(|(.., carry)| *carry).collect(),
            });
        }
    }
    leaves
}

/// Groups refunds into per-(chain, token) leaves, applying the refund cap.
/// The slow-relay release rides on the first split of each group.
fn relayer_refund_leaves(
    refunds: &BTreeMap<ChainToken, BTreeMap<Address, U256>>,
    slow_amounts: &BTreeMap<ChainToken, U256>,
    policy: &BundlePolicy,
) -> Vec<RelayerRefundLeaf> {
    let keys: BTreeSet<ChainToken> =
        refunds.keys().chain(slow_amounts.keys()).copied().collect();

    let mut leaves = Vec::new();
    for (chain, token) in keys {
        let entries: Vec<(Address, U256)> = refunds
            .get(&(chain, token))
            .map(|by_relayer| by_relayer.iter().map(|(r, a)| (*r, *a)).collect())
            .unwrap_or_default();
        let slow_relay_amount = slow_amounts.get(&(chain, token)).copied().unwrap_or(U256::ZERO);

        if entries.is_empty() {
            leaves.push(RelayerRefundLeaf {
                chain_id: chain,
                token,
                leaf_id: 0,
                slow_relay_amount,
                refund_addresses: Vec::new(),
                refund_amounts: Vec::new(),
            });
            continue;
        }

        for (leaf_id, chunk) in entries.chunks(policy.max_refunds_per_leaf).enumerate() {
            leaves.push(RelayerRefundLeaf {
                chain_id: chain,
                token,
                leaf_id: leaf_id as u32,
                slow_relay_amount: if leaf_id == 0 { slow_relay_amount } else { U256::ZERO },
                refund_addresses: chunk.iter().map(|(relayer, _)| *relayer).collect(),
                refund_amounts: chunk.iter().map(|(_, amount)| *amount).collect(),
            });
        }
    }
    leaves
}
