use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SigilError;
use crate::ledger::TokenBalance;

/// Decision policy an agent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Simple,
    Trading,
    Rebalance,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Simple,
        StrategyKind::Trading,
        StrategyKind::Rebalance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Simple => "simple",
            StrategyKind::Trading => "trading",
            StrategyKind::Rebalance => "rebalance",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = SigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(StrategyKind::Simple),
            "trading" => Ok(StrategyKind::Trading),
            "rebalance" => Ok(StrategyKind::Rebalance),
            other => Err(SigilError::Validation(format!(
                "unknown strategy '{}' (expected simple, trading or rebalance)",
                other
            ))),
        }
    }
}

/// Persisted agent state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: Uuid,
    pub wallet_name: String,
    pub wallet_address: String,
    pub strategy: StrategyKind,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Cumulative confirmed spend in SOL; never decreases
    #[serde(default)]
    pub sol_spent: Decimal,
    pub spending_limit: Decimal,
    #[serde(default)]
    pub spl_balances: Vec<TokenBalance>,
}

impl AgentRecord {
    pub fn new(
        wallet_name: impl Into<String>,
        wallet_address: impl Into<String>,
        strategy: StrategyKind,
        spending_limit: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_name: wallet_name.into(),
            wallet_address: wallet_address.into(),
            strategy,
            created_at: now,
            last_updated: now,
            sol_spent: Decimal::ZERO,
            spending_limit,
            spl_balances: Vec::new(),
        }
    }

    pub fn remaining(&self) -> Decimal {
        (self.spending_limit - self.sol_spent).max(Decimal::ZERO)
    }

    /// Fails with `LimitExceeded` if spending `amount` would pass the ceiling.
    /// A zero amount always passes.
    pub fn ensure_within_limit(&self, amount: Decimal) -> crate::error::Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let within = self
            .sol_spent
            .checked_add(amount)
            .map_or(false, |total| total <= self.spending_limit);
        if !within {
            return Err(SigilError::LimitExceeded {
                spent: self.sol_spent,
                requested: amount,
                limit: self.spending_limit,
            });
        }
        Ok(())
    }
}
