use alloy::{
    primitives::{keccak256, Address, B256, ChainId, I256, U256},
    sol_types::SolValue,
};
use serde::{Deserialize, Serialize};

/// Net collateral movement between the hub and one chain.
///
/// Token vectors are parallel and sorted by token address. Leaves for one
/// chain are split at the policy token cap into consecutive `leaf_id`s, so
/// the ordering (chain id, leaf id) is total and reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRebalanceLeaf {
    /// Chain the rebalance applies to.
    pub chain_id: ChainId,
    /// Split index within the chain's leaves.
    pub leaf_id: u32,
    /// Tokens covered by this leaf, ascending.
    pub tokens: Vec<Address>,
    /// Amount to move hub -> chain (positive) or chain -> hub (negative),
    /// parallel to `tokens`. Zero when suppressed as dust.
    pub net_send_amounts: Vec<I256>,
    /// Residual balance recorded on chain for this bundle instead of being
    /// sent, parallel to `tokens`.
    pub running_balances: Vec<I256>,
}

impl PoolRebalanceLeaf {
    /// keccak256 of the leaf's ABI encoding.
    pub fn hash(&self) -> B256 {
        keccak256(
            (
                self.chain_id,
                self.leaf_id,
                self.tokens.as_slice(),
                self.net_send_amounts.as_slice(),
                self.running_balances.as_slice(),
            )
                .abi_encode(),
        )
    }

    /// Tokens and amounts the hub must send out when executing this leaf.
    pub fn hub_outflows(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.tokens
            .iter()
            .zip(&self.net_send_amounts)
            .filter(|(_, amount)| amount.is_positive())
            .map(|(token, amount)| (*token, amount.unsigned_abs()))
    }
}

/// Refunds owed to relayers for one (chain, token).
///
/// Refund vectors are parallel and sorted by relayer address; together with
/// the (chain id, token) grouping this realizes the stable sort key
/// (chain id, token, relayer). Overflowing the policy refund cap splits the
/// leaf, never drops entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerRefundLeaf {
    /// Chain refunds are paid on.
    pub chain_id: ChainId,
    /// Refunded token.
    pub token: Address,
    /// Split index within the (chain, token) leaves.
    pub leaf_id: u32,
    /// Slow-path liquidity to release on this chain; carried by the first
    /// split only.
    pub slow_relay_amount: U256,
    /// Relayers owed refunds, ascending.
    pub refund_addresses: Vec<Address>,
    /// Refund per relayer, parallel to `refund_addresses`.
    pub refund_amounts: Vec<U256>,
}

impl RelayerRefundLeaf {
    /// keccak256 of the leaf's ABI encoding.
    pub fn hash(&self) -> B256 {
        keccak256(
            (
                self.chain_id,
                self.token,
                self.leaf_id,
                self.slow_relay_amount,
                self.refund_addresses.as_slice(),
                self.refund_amounts.as_slice(),
            )
                .abi_encode(),
        )
    }

    /// Total amount drawn from the spoke pool when executing this leaf.
    pub fn total_refund_amount(&self) -> U256 {
        self.refund_amounts.iter().fold(U256::ZERO, |acc, amount| acc.saturating_add(*amount))
    }
}

/// A deposit whose fast-path window elapsed without a fill; it must be
/// completed via the slow path on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowRelayLeaf {
    /// Origin chain of the unfilled deposit.
    pub origin_chain_id: ChainId,
    /// Id of the unfilled deposit.
    pub deposit_id: u64,
    /// Chain the slow fill pays out on.
    pub destination_chain_id: ChainId,
    /// Recipient of the slow fill.
    pub depositor: Address,
    /// Token to pay out.
    pub token: Address,
    /// Amount to pay out.
    pub amount: U256,
}

impl SlowRelayLeaf {
    /// keccak256 of the leaf's ABI encoding.
    pub fn hash(&self) -> B256 {
        keccak256(
            (
                self.origin_chain_id,
                self.deposit_id,
                self.destination_chain_id,
                self.depositor,
                self.token,
                self.amount,
            )
                .abi_encode(),
        )
    }
}
