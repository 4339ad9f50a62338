use async_trait::async_trait;

use super::types::{SimulationResult, TokenBalance, Transaction};
use crate::error::Result;

/// Narrow view of the ledger network used by the core.
///
/// Implementations report blockhash staleness as
/// [`SigilError::TransientNetwork`](crate::error::SigilError::TransientNetwork)
/// so the submission pipeline can tell it apart from terminal failures.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Recent blockhash that makes a transaction valid for a short window
    async fn latest_blockhash(&self) -> Result<String>;

    /// Dry-run a signed transaction without committing it
    async fn simulate(&self, tx: &Transaction) -> Result<SimulationResult>;

    /// Submit and wait for "confirmed" commitment; returns the signature
    async fn submit_and_confirm(&self, tx: &Transaction) -> Result<String>;

    /// Native balance in lamports
    async fn get_balance(&self, public_key: &str) -> Result<u64>;

    async fn get_token_balances(&self, public_key: &str) -> Result<Vec<TokenBalance>>;

    /// Dev/test networks only
    async fn request_airdrop(&self, public_key: &str, lamports: u64) -> Result<String>;
}

/// Third party that pays network fees for an already-signed transaction
#[async_trait]
pub trait FeeSponsor: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn submit(&self, tx: &Transaction) -> Result<String>;
}
