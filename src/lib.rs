//! # Settlement Dataworker
//!
//! Off-chain settlement engine for a cross-chain value-transfer protocol.
//!
//! Deposits observed on source chains and fills observed on destination chains
//! are reconciled into three Merkle trees per bundle: pool rebalances, relayer
//! refunds and slow relays. The dataworker proposes the roots on the hub
//! chain, disputes proposals it cannot reproduce, and executes approved leaves
//! once their challenge period elapses.

pub mod bridge;
pub mod bundler;
pub mod config;
pub mod dataworker;
pub mod error;
pub mod executor;
pub mod merkle;
pub mod metrics;
pub mod proposer;
pub mod resolver;
pub mod sources;
pub mod transactions;
pub mod types;
pub mod validator;
