//! Output formatting for CLI commands: tables by default, JSON with `--json`.

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::registry::AgentRecord;
use crate::runner::LoopState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct WalletRow {
    pub name: String,
    pub public_key: String,
    pub agent: String,
}

#[derive(Debug, Serialize, Tabled)]
pub struct AgentRow {
    pub id: String,
    pub wallet: String,
    pub strategy: String,
    pub spent: String,
    pub limit: String,
    pub state: String,
    pub updated: String,
}

impl AgentRow {
    pub fn from_record(record: &AgentRecord, state: LoopState) -> Self {
        Self {
            id: record.id.to_string(),
            wallet: record.wallet_name.clone(),
            strategy: record.strategy.to_string(),
            spent: record.sol_spent.to_string(),
            limit: record.spending_limit.to_string(),
            state: state.to_string(),
            updated: record.last_updated.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

/// Single records always print as JSON
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("\x1b[32m{msg}\x1b[0m");
}

pub fn print_warn(msg: &str) {
    println!("\x1b[33m{msg}\x1b[0m");
}

pub fn print_error(msg: &str) {
    eprintln!("\x1b[31m{msg}\x1b[0m");
}
