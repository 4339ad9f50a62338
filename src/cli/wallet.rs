//! Wallet commands
//!
//! sigil wallet create <name>      - Generate and encrypt a new keypair
//! sigil wallet list               - List stored wallets
//! sigil wallet show <name>        - Show a wallet's public key and agent
//! sigil wallet airdrop <name>     - Fund a wallet on the dev ledger

use clap::Subcommand;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use tracing::info;

use super::output::{self, WalletRow};
use super::Context;
use crate::ledger::{lamports_to_sol, sol_to_lamports, LedgerClient};

#[derive(Subcommand, Debug)]
pub enum WalletCommands {
    /// Generate a keypair and store it encrypted under NAME
    Create { name: String },

    /// List stored wallets
    List,

    /// Show one wallet
    Show { name: String },

    /// Request dev-network funds for a wallet
    Airdrop {
        name: String,

        /// SOL to request
        #[arg(long, default_value = "1")]
        amount: Decimal,
    },
}

impl WalletCommands {
    pub fn needs_passphrase(&self) -> bool {
        matches!(self, WalletCommands::Create { .. })
    }
}

pub async fn run(cmd: WalletCommands, ctx: &Context) -> anyhow::Result<()> {
    let keys = ctx.registry.keys();

    match cmd {
        WalletCommands::Create { name } => {
            let public_key = keys.create(&name).await?;
            info!("Created wallet {}", name);
            output::print_success(&format!("Created wallet {name}"));
            println!("public key: {public_key}");
            println!("stored in:  {}", keys.dir().display());
        }
        WalletCommands::List => {
            let names = keys.list().await?;
            let rows = try_join_all(names.iter().map(|name| wallet_row(ctx, name))).await?;
            output::print_items(&rows, ctx.mode)?;
        }
        WalletCommands::Show { name } => {
            let row = wallet_row(ctx, &name).await?;
            output::print_items(&[row], ctx.mode)?;
        }
        WalletCommands::Airdrop { name, amount } => {
            let public_key = keys.public_key(&name).await?;
            let signature = ctx
                .ledger
                .request_airdrop(&public_key, sol_to_lamports(amount)?)
                .await?;
            let balance = lamports_to_sol(ctx.ledger.get_balance(&public_key).await?);
            output::print_success(&format!("Airdropped {amount} SOL to {name}"));
            println!("signature: {signature}");
            println!("balance:   {balance} SOL (in-process dev ledger)");
        }
    }
    Ok(())
}

async fn wallet_row(ctx: &Context, name: &str) -> anyhow::Result<WalletRow> {
    let public_key = ctx.registry.keys().public_key(name).await?;
    let agent = ctx
        .registry
        .find_by_wallet(name)
        .await?
        .map(|r| r.id.to_string())
        .unwrap_or_else(|| "-".to_string());
    Ok(WalletRow {
        name: name.to_string(),
        public_key,
        agent,
    })
}
