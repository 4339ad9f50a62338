//! Sigil CLI
//!
//! Commands:
//! - `sigil wallet` - Create and inspect encrypted wallets
//! - `sigil agent`  - Register, inspect, run and stop agents

pub mod agent;
pub mod output;
pub mod wallet;

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::AppConfig;
use crate::ledger::SimulatedLedger;
use crate::registry::{AgentRegistry, DEFAULT_VOLATILITY_BPS};
use crate::strategies::SimulatedPriceFeed;

pub use output::OutputMode;

pub use agent::AgentCommands;
pub use wallet::WalletCommands;

/// Autonomous agent wallets with encrypted custody and spending limits
#[derive(Parser, Debug)]
#[command(name = "sigil")]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding default.toml and environment overrides
    #[arg(long, global = true, default_value = "config", env = "SIGIL_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage encrypted wallets
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Manage agents
    #[command(subcommand)]
    Agent(AgentCommands),
}

impl Commands {
    /// Whether the command needs to decrypt or create key material
    pub fn needs_passphrase(&self) -> bool {
        match self {
            Commands::Wallet(cmd) => cmd.needs_passphrase(),
            Commands::Agent(cmd) => cmd.needs_passphrase(),
        }
    }
}

/// Fill in the passphrase from an interactive prompt when nothing is configured
pub fn ensure_passphrase(config: &mut AppConfig) -> anyhow::Result<()> {
    if config.custody.resolve_passphrase().is_some() || !std::io::stdin().is_terminal() {
        return Ok(());
    }
    // Use rpassword so the passphrase is never echoed
    let entered = Zeroizing::new(rpassword::prompt_password("Wallet passphrase: ")?);
    if !entered.trim().is_empty() {
        config.custody.passphrase = Some(entered.trim().to_string());
    }
    Ok(())
}

/// Everything a command needs, wired against the in-process dev ledger
pub struct Context {
    pub config: AppConfig,
    pub ledger: Arc<SimulatedLedger>,
    pub registry: AgentRegistry,
    pub mode: OutputMode,
}

impl Context {
    pub fn new(config: AppConfig, mode: OutputMode) -> anyhow::Result<Self> {
        let ledger = Arc::new(SimulatedLedger::new());
        let feed = SimulatedPriceFeed::new(config.strategies.initial_price, DEFAULT_VOLATILITY_BPS).mirror_to(ledger.clone());
        let registry = AgentRegistry::from_config(&config, ledger.clone(), Arc::new(feed))?;
        Ok(Self {
            config,
            ledger,
            registry,
            mode,
        })
    }
}

pub async fn run(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Wallet(cmd) => wallet::run(cmd, ctx).await,
        Commands::Agent(cmd) => agent::run(cmd, ctx).await,
    }
}
