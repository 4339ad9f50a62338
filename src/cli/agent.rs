//! Agent commands
//!
//! sigil agent spawn <strategy>           - New wallet plus agent record
//! sigil agent promote <wallet> <strategy> - Register an existing wallet
//! sigil agent list                       - List agents
//! sigil agent show <id>                  - Show one agent record
//! sigil agent stop <id>                  - Stop an agent
//! sigil agent run <id>                   - Run an agent's strategy in the foreground

use clap::Subcommand;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::output::{self, AgentRow};
use super::Context;
use crate::ledger::{sol_to_lamports, LedgerClient};
use crate::registry::StrategyKind;
use crate::runner::{LoopConfig, LoopState};
use crate::submission::SubmitOptions;

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Create a wallet and register it as an agent
    Spawn {
        /// simple, trading or rebalance
        strategy: StrategyKind,

        /// Wallet name (generated when omitted)
        #[arg(long)]
        wallet: Option<String>,

        /// Spending limit in SOL (configured default when omitted)
        #[arg(long)]
        limit: Option<Decimal>,
    },

    /// Register an existing wallet as an agent
    Promote {
        wallet: String,

        /// simple, trading or rebalance
        strategy: StrategyKind,

        #[arg(long)]
        limit: Option<Decimal>,
    },

    /// List agents
    List,

    /// Show one agent
    Show { id: Uuid },

    /// Stop an agent
    Stop { id: Uuid },

    /// Run an agent until it completes or Ctrl-C
    Run {
        id: Uuid,

        /// Iterations (configured default when omitted)
        #[arg(long)]
        iterations: Option<u32>,

        /// Pause between iterations in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Dev-ledger SOL credited to the wallet before starting
        #[arg(long, default_value = "1")]
        fund: Decimal,

        /// Submit without a dry run
        #[arg(long)]
        skip_simulation: bool,
    },
}

impl AgentCommands {
    pub fn needs_passphrase(&self) -> bool {
        matches!(
            self,
            AgentCommands::Spawn { .. } | AgentCommands::Promote { .. } | AgentCommands::Run { .. }
        )
    }
}

pub async fn run(cmd: AgentCommands, ctx: &Context) -> anyhow::Result<()> {
    let registry = &ctx.registry;

    match cmd {
        AgentCommands::Spawn {
            strategy,
            wallet,
            limit,
        } => {
            let record = registry.spawn(strategy, wallet.as_deref(), limit).await?;
            output::print_success(&format!("Spawned {} agent {}", strategy, record.id));
            output::print_item(&record)?;
        }
        AgentCommands::Promote {
            wallet,
            strategy,
            limit,
        } => {
            let record = registry.promote(&wallet, strategy, limit).await?;
            output::print_success(&format!("Promoted {} to {} agent {}", wallet, strategy, record.id));
            output::print_item(&record)?;
        }
        AgentCommands::List => {
            let rows: Vec<AgentRow> = registry
                .list()
                .await?
                .iter()
                .map(|r| AgentRow::from_record(r, registry.loop_state(r.id)))
                .collect();
            output::print_items(&rows, ctx.mode)?;
        }
        AgentCommands::Show { id } => {
            output::print_item(&registry.get(id).await?)?;
        }
        AgentCommands::Stop { id } => {
            if registry.stop(id).await? {
                output::print_success(&format!("Stopped agent {id}"));
            } else {
                output::print_warn(&format!("Agent {id} is not running in this process"));
            }
        }
        AgentCommands::Run {
            id,
            iterations,
            interval_ms,
            fund,
            skip_simulation,
        } => {
            let record = registry.get(id).await?;
            if fund > Decimal::ZERO {
                ctx.ledger
                    .request_airdrop(&record.wallet_address, sol_to_lamports(fund)?)
                    .await?;
                info!("Credited {} SOL to {} on the dev ledger", fund, record.wallet_name);
            }

            let runner = &ctx.config.runner;
            let mut config = LoopConfig::new(
                iterations.unwrap_or(runner.iterations),
                Duration::from_millis(interval_ms.unwrap_or(runner.interval_ms)),
            );
            config.submit = SubmitOptions {
                skip_simulation: skip_simulation || ctx.config.submission.skip_simulation,
            };

            let run = registry.run(id, config);
            tokio::pin!(run);
            let finished = tokio::select! {
                outcome = &mut run => Some(outcome?),
                _ = tokio::signal::ctrl_c() => None,
            };
            let outcome = match finished {
                Some(outcome) => outcome,
                None => {
                    warn!("Ctrl-C received, stopping agent {}", id);
                    registry.stop(id).await?;
                    run.await?
                }
            };

            match outcome.state {
                LoopState::Stopped => output::print_warn(&format!(
                    "Agent {id} stopped after {} iterations",
                    outcome.iterations_run
                )),
                _ => output::print_success(&format!(
                    "Agent {id} completed {} iterations",
                    outcome.iterations_run
                )),
            }
            println!(
                "confirmed: {}  failed: {}",
                outcome.signatures.len(),
                outcome.failures
            );
            for signature in &outcome.signatures {
                println!("  {signature}");
            }
            output::print_item(&registry.get(id).await?)?;
        }
    }
    Ok(())
}
