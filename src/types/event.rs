use alloy::primitives::{Address, BlockNumber, ChainId, U256};
use serde::{Deserialize, Serialize};

/// Identifies a deposit across chains: (origin chain, deposit id).
pub type DepositKey = (ChainId, u64);

/// A cross-chain transfer intent observed on its origin chain.
///
/// Immutable once observed; the event source is expected to replay it
/// identically for any window that covers its block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Chain the deposit was made on.
    pub origin_chain_id: ChainId,
    /// Chain the deposit should be filled on.
    pub destination_chain_id: ChainId,
    /// Account that made the deposit.
    pub depositor: Address,
    /// Deposited token.
    pub token: Address,
    /// Deposited amount.
    pub amount: U256,
    /// Id assigned by the origin spoke pool, unique per origin chain.
    pub deposit_id: u64,
    /// Block the deposit was observed in.
    pub origin_block: BlockNumber,
}

impl Deposit {
    /// Key fills resolve against.
    pub fn key(&self) -> DepositKey {
        (self.origin_chain_id, self.deposit_id)
    }
}

/// A fulfillment of a deposit observed on the destination chain.
///
/// A fill is *unmatched* while no [`Deposit`] with the same key has been
/// observed in the currently loaded window. Unmatched fills are the central
/// source of non-determinism the range resolver must bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Chain the fill was made on.
    pub destination_chain_id: ChainId,
    /// Origin chain of the deposit this fill claims to fulfill.
    pub origin_chain_id: ChainId,
    /// Deposit id this fill claims to fulfill.
    pub deposit_id: u64,
    /// Relayer that fronted the funds.
    pub relayer: Address,
    /// Chain the relayer elected to be refunded on.
    pub repayment_chain_id: ChainId,
    /// Filled token.
    pub token: Address,
    /// Filled amount.
    pub amount: U256,
    /// Block the fill was observed in.
    pub destination_block: BlockNumber,
}

impl Fill {
    /// Key of the deposit this fill resolves against.
    pub fn deposit_key(&self) -> DepositKey {
        (self.origin_chain_id, self.deposit_id)
    }
}
