//! The dataworker loop: resolve, validate, dispute, propose, execute.

use crate::{
    bundler::build_bundle,
    config::{ConfigError, DataworkerConfig},
    error::DataworkerError,
    executor::{BalanceAllocator, ExecutionOrchestrator, ExecutionReport},
    metrics::DataworkerMetrics,
    proposer::Proposer,
    resolver::{RangeResolution, RangeResolver},
    sources::{BalanceSource, EventSource, HubReader},
    transactions::TransactionQueue,
    validator::{BundleValidator, BundleValidity},
};
use alloy::primitives::ChainId;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// What one iteration did, for logs and tests.
#[derive(Debug, Default)]
pub struct IterationSummary {
    /// Fetch rounds range resolution needed.
    pub resolver_rounds: usize,
    /// Chains excluded as unreconstructable.
    pub excluded_chains: Vec<ChainId>,
    /// Verdict on the pending bundle, if one existed.
    pub validity: Option<BundleValidity>,
    /// Whether a dispute was queued.
    pub disputed: bool,
    /// Whether a proposal was queued.
    pub proposed: bool,
    /// Leaf execution report, when the pending bundle was executable.
    pub execution: Option<ExecutionReport>,
    /// Calls handed to the submission layer this iteration.
    pub flushed: usize,
}

/// Stateless settlement engine over external collaborators.
///
/// All state lives on chain or with the collaborators; restarting the
/// dataworker at any point loses nothing.
#[derive(Debug)]
pub struct Dataworker<S, H, B, Q> {
    config: DataworkerConfig,
    source: S,
    hub: H,
    balances: B,
    queue: Q,
    metrics: DataworkerMetrics,
}

impl<S, H, B, Q> Dataworker<S, H, B, Q>
where
    S: EventSource,
    H: HubReader,
    B: BalanceSource,
    Q: TransactionQueue,
{
    /// Creates a new [`Dataworker`], rejecting invalid configurations.
    pub fn new(
        config: DataworkerConfig,
        source: S,
        hub: H,
        balances: B,
        queue: Q,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, source, hub, balances, queue, metrics: DataworkerMetrics::default() })
    }

    /// The submission queue this dataworker feeds.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Runs the loop until `shutdown` flips to `true`.
    ///
    /// Iteration failures are logged and retried on the next poll; only
    /// configuration errors terminate the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> eyre::Result<()> {
        info!(chains = ?self.config.chain_ids().collect::<Vec<_>>(), "dataworker started");
        loop {
            match self.run_once().await {
                Ok(summary) => {
                    info!(
                        rounds = summary.resolver_rounds,
                        excluded = ?summary.excluded_chains,
                        validity = ?summary.validity,
                        disputed = summary.disputed,
                        proposed = summary.proposed,
                        flushed = summary.flushed,
                        "iteration complete"
                    );
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    self.metrics.iteration_failures.increment(1);
                    error!(%err, "iteration failed");
                }
            }

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender means no one can ever ask us to stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("dataworker stopped");
        Ok(())
    }

    /// One full pass: resolve ranges, validate and maybe dispute the pending
    /// bundle, propose a new one when idle, execute approved leaves, flush.
    #[instrument(skip(self), name = "iteration")]
    pub async fn run_once(&self) -> Result<IterationSummary, DataworkerError> {
        let mut summary = IterationSummary::default();

        let resolution = RangeResolver::new(&self.source, &self.hub, &self.config).resolve().await?;
        summary.resolver_rounds = resolution.rounds();
        summary.excluded_chains = resolution.invalid_chains();
        self.metrics.resolver_retries.increment(resolution.rounds().saturating_sub(1) as u64);
        self.metrics.excluded_chains.set(summary.excluded_chains.len() as f64);

        let pending = self.hub.pending_bundle().await?;
        let proposer = Proposer::new(&self.config);

        if let Some(pending) = &pending {
            let outcome = BundleValidator::new(&self.config).validate(pending, &resolution)?;
            summary.validity = Some(outcome.validity.clone());

            if outcome.validity.is_disputable() {
                if self.config.dispute_enabled {
                    warn!(validity = ?outcome.validity, "disputing pending bundle");
                    self.queue.enqueue(proposer.dispute_call()).await?;
                    self.metrics.bundles_disputed.increment(1);
                    summary.disputed = true;
                } else {
                    warn!(validity = ?outcome.validity, "invalid pending bundle, disputes disabled");
                }
            } else if outcome.validity.is_ok()
                && self.config.execute_enabled
                && pending.is_executable(self.hub.current_time().await?)
            {
                // Reuse the trees validation already rebuilt.
                let Some(bundle) = outcome.recomputed else {
                    return Ok(summary);
                };
                let orchestrator = ExecutionOrchestrator::new(&self.config);
                let mut allocator =
                    BalanceAllocator::seed(&self.balances, orchestrator.balance_keys(&bundle))
                        .await?;
                let report =
                    orchestrator.execute_bundle(&bundle, &mut allocator, &self.queue).await?;
                self.metrics.leaves_executed.increment(report.queued.len() as u64);
                self.metrics.leaves_skipped.increment(report.skipped.len() as u64);
                summary.execution = Some(report);
            }
        }

        if proposer.should_propose(pending.as_ref(), &resolution) {
            let bundle =
                build_bundle(resolution.ranges(), resolution.snapshot(), &self.config.policy)?;
            info!(
                pool_rebalance_leaves = bundle.pool_rebalance_leaves.len(),
                relayer_refund_leaves = bundle.relayer_refund_leaves.len(),
                slow_relay_leaves = bundle.slow_relay_leaves.len(),
                "proposing root bundle"
            );
            self.queue.enqueue(proposer.propose_call(resolution.ranges(), &bundle)).await?;
            self.metrics.bundles_proposed.increment(1);
            summary.proposed = true;
        }

        summary.flushed = self.queue.flush().await?.len();
        Ok(summary)
    }

    /// The resolution this iteration would act on; exposed for inspection
    /// tooling.
    pub async fn resolve_ranges(&self) -> Result<RangeResolution, DataworkerError> {
        Ok(RangeResolver::new(&self.source, &self.hub, &self.config).resolve().await?)
    }
}
