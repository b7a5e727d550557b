//! Per-chain bridge adapters behind the [`EventSource`] seam.
//!
//! Each adapter wraps one chain's spoke pool and knows how to read its event
//! log. The registry aggregates them into a single [`EventSource`] so the
//! rest of the dataworker never handles per-chain clients directly.

use crate::{
    sources::{EventSource, SourceError},
    types::{Deposit, Fill},
};
use alloy::primitives::{BlockNumber, ChainId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::trace;

/// Event log access for a single chain's spoke pool.
#[async_trait]
pub trait BridgeAdapter: Send + Sync + std::fmt::Debug {
    /// Chain this adapter serves.
    fn chain_id(&self) -> ChainId;

    /// Deposit events within the inclusive block range.
    async fn deposits(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Deposit>, SourceError>;

    /// Fill events within the inclusive block range.
    async fn fills(&self, from: BlockNumber, to: BlockNumber) -> Result<Vec<Fill>, SourceError>;

    /// Latest known block on this chain.
    async fn latest_block(&self) -> Result<BlockNumber, SourceError>;
}

/// Collection of bridge adapters keyed by chain, exposed as one
/// [`EventSource`].
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    adapters: BTreeMap<ChainId, Box<dyn BridgeAdapter>>,
}

impl BridgeRegistry {
    /// Builds a registry from `adapters`. A later adapter for the same chain
    /// replaces the earlier one.
    pub fn new(adapters: impl IntoIterator<Item = Box<dyn BridgeAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.chain_id(), adapter))
                .collect(),
        }
    }

    /// Chains with a registered adapter.
    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.adapters.keys().copied()
    }

    fn adapter(&self, chain: ChainId) -> Result<&dyn BridgeAdapter, SourceError> {
        self.adapters.get(&chain).map(|adapter| adapter.as_ref()).ok_or_else(|| {
            SourceError::DataUnavailable { chain, reason: "no bridge adapter".into() }
        })
    }
}

#[async_trait]
impl EventSource for BridgeRegistry {
    async fn deposits(
        &self,
        chain: ChainId,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Deposit>, SourceError> {
        trace!(chain_id = chain, from, to, "fetching deposits");
        self.adapter(chain)?.deposits(from, to).await
    }

    async fn fills(
        &self,
        chain: ChainId,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<Fill>, SourceError> {
        trace!(chain_id = chain, from, to, "fetching fills");
        self.adapter(chain)?.fills(from, to).await
    }

    async fn latest_block(&self, chain: ChainId) -> Result<BlockNumber, SourceError> {
        self.adapter(chain)?.latest_block().await
    }
}
