//! Top-level error type for the dataworker loop.

use crate::{
    bundler::BundleError, config::ConfigError, executor::ExecutorError, merkle::MerkleError,
    sources::SourceError, transactions::QueueError,
};

/// Errors terminating a single dataworker iteration.
///
/// Only [`DataworkerError::Config`] is fatal to the loop; everything else is
/// logged and retried on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum DataworkerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// External data could not be fetched.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Bundle construction failed.
    #[error(transparent)]
    Bundle(#[from] BundleError),
    /// Merkle tree construction or proof generation failed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The submission queue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Leaf execution failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl DataworkerError {
    /// Whether the error should terminate the loop rather than the iteration.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
