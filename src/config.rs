//! Dataworker configuration.

use alloy::primitives::{Address, BlockNumber, ChainId, U256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// Errors returned by [`DataworkerConfig::validate`].
///
/// All of these are fatal: the dataworker refuses to operate on partial or
/// inconsistent configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No chains are configured.
    #[error("no chains configured")]
    NoChains,
    /// The hub chain has no chain configuration.
    #[error("hub chain {0} has no chain configuration")]
    MissingHubChain(ChainId),
    /// The widening retry multiplier would not widen.
    #[error("retry multiplier must be at least 2, got {0}")]
    InvalidRetryMultiplier(usize),
    /// The initial lookback must cover at least one bundle.
    #[error("lookback must be at least 1")]
    ZeroLookback,
    /// Leaf caps of zero would make every bundle unrepresentable.
    #[error("leaf caps must be at least 1")]
    ZeroLeafCap,
}

/// Per-chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Spoke pool address on this chain.
    pub spoke_pool: Address,
    /// Block the spoke pool was deployed at; fetch windows never reach below
    /// it.
    pub deploy_block: BlockNumber,
    /// Confirmations subtracted from the observed head when ending a bundle
    /// range.
    #[serde(default = "default_confirmation_buffer")]
    pub confirmation_buffer: u64,
}

const fn default_confirmation_buffer() -> u64 {
    64
}

/// Dust suppression and leaf splitting policy for bundle construction.
///
/// The exact threshold semantics are deployment-specific, so the policy is
/// data, not code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePolicy {
    /// Net amounts with absolute value below this are not rebalanced.
    /// Relayer refunds still settle.
    #[serde(default)]
    pub dust_threshold: U256,
    /// Per-token overrides of [`Self::dust_threshold`].
    #[serde(default)]
    pub token_dust_thresholds: BTreeMap<Address, U256>,
    /// Maximum tokens per pool rebalance leaf before splitting.
    #[serde(default = "default_max_tokens_per_pool_leaf")]
    pub max_tokens_per_pool_leaf: usize,
    /// Maximum refund entries per relayer refund leaf before splitting.
    #[serde(default = "default_max_refunds_per_leaf")]
    pub max_refunds_per_leaf: usize,
}

const fn default_max_tokens_per_pool_leaf() -> usize {
    25
}

const fn default_max_refunds_per_leaf() -> usize {
    25
}

impl Default for BundlePolicy {
    fn default() -> Self {
        Self {
            dust_threshold: U256::ZERO,
            token_dust_thresholds: BTreeMap::new(),
            max_tokens_per_pool_leaf: default_max_tokens_per_pool_leaf(),
            max_refunds_per_leaf: default_max_refunds_per_leaf(),
        }
    }
}

impl BundlePolicy {
    /// Dust threshold applying to `token`.
    pub fn dust_threshold_for(&self, token: Address) -> U256 {
        self.token_dust_thresholds.get(&token).copied().unwrap_or(self.dust_threshold)
    }
}

/// Dataworker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataworkerConfig {
    /// Chain id of the hub chain.
    pub hub_chain_id: ChainId,
    /// Hub pool address on the hub chain.
    pub hub_pool: Address,
    /// Chain configurations, keyed by chain id.
    pub chains: BTreeMap<ChainId, ChainConfig>,
    /// Number of validated bundles the fetch window initially reaches behind
    /// the executed floor.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Hard ceiling on widening retries; the resolver performs at most
    /// `max_retries + 1` fetch rounds.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Lookback multiplier applied on each widening retry.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: usize,
    /// Whether this operator proposes new bundles.
    #[serde(default = "default_true")]
    pub propose_enabled: bool,
    /// Whether this operator disputes invalid bundles.
    #[serde(default = "default_true")]
    pub dispute_enabled: bool,
    /// Whether this operator executes approved leaves.
    #[serde(default = "default_true")]
    pub execute_enabled: bool,
    /// Time between control loop iterations.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Bundle construction policy.
    #[serde(default)]
    pub policy: BundlePolicy,
}

const fn default_lookback() -> usize {
    4
}

const fn default_max_retries() -> usize {
    3
}

const fn default_retry_multiplier() -> usize {
    2
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

impl DataworkerConfig {
    /// Parses a configuration from JSON, applying field defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        if !self.chains.contains_key(&self.hub_chain_id) {
            return Err(ConfigError::MissingHubChain(self.hub_chain_id));
        }
        if self.retry_multiplier < 2 {
            return Err(ConfigError::InvalidRetryMultiplier(self.retry_multiplier));
        }
        if self.lookback == 0 {
            return Err(ConfigError::ZeroLookback);
        }
        if self.policy.max_tokens_per_pool_leaf == 0 || self.policy.max_refunds_per_leaf == 0 {
            return Err(ConfigError::ZeroLeafCap);
        }
        Ok(())
    }

    /// Configured chain ids, in canonical order.
    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.keys().copied()
    }

    /// Configuration of `chain`, if known.
    pub fn chain(&self, chain: ChainId) -> Option<&ChainConfig> {
        self.chains.get(&chain)
    }
}
