//! Contract call requests and the submission queue collaborator.

use alloy::{
    primitives::{keccak256, Address, Bytes, ChainId, U256},
    sol_types::SolValue,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

alloy::primitives::wrap_fixed_bytes! {
    /// Identifier of a queued contract call, derived from its content.
    pub struct CallId<32>;
}

/// Errors returned by the submission queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue rejected a call outright.
    #[error("queue rejected call {0}: {1}")]
    Rejected(CallId, String),
    /// The queue could not flush.
    #[error("queue flush failed: {0}")]
    FlushFailed(String),
}

/// A single contract call request produced by the dataworker.
///
/// The dataworker only requests calls; broadcasting, batching and gas
/// management belong to the submission layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Content-derived call id.
    pub id: CallId,
    /// Chain the call targets.
    pub chain_id: ChainId,
    /// Contract the call targets.
    pub target: Address,
    /// ABI-encoded calldata.
    pub calldata: Bytes,
    /// Native value attached to the call.
    pub value: U256,
}

impl ContractCall {
    /// Creates a new zero-value [`ContractCall`].
    pub fn new(chain_id: ChainId, target: Address, calldata: Bytes) -> Self {
        let id = CallId(keccak256((chain_id, target, &calldata).abi_encode_packed()));
        Self { id, chain_id, target, calldata, value: U256::ZERO }
    }
}

/// Outcome of a flushed call as reported by the submission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    /// Id of the flushed call.
    pub id: CallId,
    /// Whether the call was accepted for submission.
    pub success: bool,
    /// Failure description, if any.
    pub reason: Option<String>,
}

/// Transaction submission queue collaborator.
///
/// `enqueue` only records intent; nothing reaches a chain until `flush`.
#[async_trait]
pub trait TransactionQueue: Send + Sync + std::fmt::Debug {
    /// Queues a call for submission.
    async fn enqueue(&self, call: ContractCall) -> Result<(), QueueError>;

    /// Submits all queued calls and reports per-call outcomes.
    async fn flush(&self) -> Result<Vec<CallResult>, QueueError>;
}

/// In-memory call buffer implementing [`TransactionQueue`].
///
/// Stands in for the external submission layer in tests; flush drains the
/// buffer and reports every call as submitted.
#[derive(Debug, Default)]
pub struct CallBuffer {
    calls: Mutex<Vec<ContractCall>>,
    flushed: Mutex<Vec<ContractCall>>,
}

impl CallBuffer {
    /// Calls queued since the last flush.
    pub fn queued(&self) -> Vec<ContractCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// All calls flushed so far.
    pub fn flushed(&self) -> Vec<ContractCall> {
        self.flushed.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TransactionQueue for CallBuffer {
    async fn enqueue(&self, call: ContractCall) -> Result<(), QueueError> {
        self.calls
            .lock()
            .map_err(|_| QueueError::Rejected(call.id, "queue poisoned".into()))?
            .push(call);
        Ok(())
    }

    async fn flush(&self) -> Result<Vec<CallResult>, QueueError> {
        let drained: Vec<ContractCall> = {
            let mut calls =
                self.calls.lock().map_err(|_| QueueError::FlushFailed("queue poisoned".into()))?;
            std::mem::take(&mut *calls)
        };
        let results = drained
            .iter()
            .map(|call| CallResult { id: call.id, success: true, reason: None })
            .collect();
        if let Ok(mut flushed) = self.flushed.lock() {
            flushed.extend(drained);
        }
        Ok(results)
    }
}
