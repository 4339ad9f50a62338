//! Generalized execution loop
//!
//! One iterate/decide/act/pace engine drives every strategy. Strategies only
//! implement [`Decide`]; pacing, cancellation, spend limits and submission
//! live here.

pub mod decision;
pub mod running;

pub use decision::{Action, Decide, Decision, Intent, Observation, SpendGuard};
pub use running::{cancel_pair, CancelHandle, CancelSignal, RunGuard, RunningAgents};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::custody::Keypair;
use crate::error::Result;
use crate::ledger::lamports_to_sol;
use crate::submission::{SubmitOptions, TransactionSubmitter};

/// `Idle` means no loop is live for an agent; each run starts in `Running`
/// and ends in `Completed` or `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Completed,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Completed => "completed",
            LoopState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub iterations: u32,
    /// Pause between iterations; zero disables pacing
    pub interval: Duration,
    pub submit: SubmitOptions,
}

impl LoopConfig {
    pub fn new(iterations: u32, interval: Duration) -> Self {
        Self {
            iterations,
            interval,
            submit: SubmitOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub state: LoopState,
    /// Confirmed signatures in submission order
    pub signatures: Vec<String>,
    pub iterations_run: u32,
    pub failures: u32,
}

pub struct ExecutionLoop {
    submitter: Arc<TransactionSubmitter>,
}

impl ExecutionLoop {
    pub fn new(submitter: Arc<TransactionSubmitter>) -> Self {
        Self { submitter }
    }

    /// Drive `decider` until the iteration budget is spent or `cancel` fires.
    ///
    /// A failing iteration is logged and skipped; it never ends the run.
    pub async fn run(
        &self,
        wallet: &Keypair,
        decider: &mut dyn Decide,
        config: &LoopConfig,
        cancel: &mut CancelSignal,
        spend: Option<&dyn SpendGuard>,
    ) -> LoopOutcome {
        let mut outcome = LoopOutcome {
            state: LoopState::Running,
            signatures: Vec::new(),
            iterations_run: 0,
            failures: 0,
        };

        info!(
            "Starting {} for {} ({} iterations, interval {:?})",
            decider.name(),
            wallet.public_key(),
            config.iterations,
            config.interval
        );

        for iteration in 0..config.iterations {
            if cancel.is_cancelled() {
                outcome.state = LoopState::Stopped;
                break;
            }

            outcome.iterations_run += 1;
            match self.iterate(wallet, decider, iteration, config, spend).await {
                Ok(Some(signature)) => outcome.signatures.push(signature),
                Ok(None) => {}
                Err(e) => {
                    outcome.failures += 1;
                    warn!("Iteration {} failed: {}", iteration + 1, e);
                }
            }

            let last = iteration + 1 == config.iterations;
            if last || config.interval.is_zero() {
                continue;
            }
            if cancel.is_cancelled() || cancel.sleep(config.interval).await {
                outcome.state = LoopState::Stopped;
                break;
            }
        }

        if outcome.state == LoopState::Running {
            outcome.state = LoopState::Completed;
        }

        info!(
            "{} {} after {} iterations: {} confirmed, {} failed",
            decider.name(),
            outcome.state,
            outcome.iterations_run,
            outcome.signatures.len(),
            outcome.failures
        );
        outcome
    }

    async fn iterate(
        &self,
        wallet: &Keypair,
        decider: &mut dyn Decide,
        iteration: u32,
        config: &LoopConfig,
        spend: Option<&dyn SpendGuard>,
    ) -> Result<Option<String>> {
        let address = wallet.public_key();
        let client = self.submitter.client();
        let balance = lamports_to_sol(client.get_balance(&address).await?);
        let tokens = client.get_token_balances(&address).await?;

        let observation = Observation {
            iteration,
            iterations: config.iterations,
            wallet_address: address.clone(),
            balance,
            tokens,
        };
        let decision = decider.decide(&observation).await?;

        let intent = match decision.action {
            Action::Hold => {
                debug!("Iteration {}: hold ({})", iteration + 1, decision.rationale);
                return Ok(None);
            }
            Action::Act(intent) => intent,
        };

        info!("Iteration {}: {} ({})", iteration + 1, intent, decision.rationale);

        let cost = intent.sol_cost();
        if let Some(guard) = spend {
            guard.check(cost).await?;
        }

        let tx = intent.to_transaction(&address)?;
        let signature = self.submitter.submit(tx, wallet, config.submit).await?;

        if let Some(guard) = spend {
            // The transfer already happened; a failed record cannot undo it.
            if let Err(e) = guard.record(cost).await {
                error!(
                    signature = %signature,
                    "Confirmed transaction but failed to record {} SOL spend: {}",
                    cost, e
                );
            }
        }

        Ok(Some(signature))
    }
}
