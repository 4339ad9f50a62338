use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SigilError};
use crate::ledger::{sol_to_lamports, Instruction, SwapData, TokenBalance, Transaction, NATIVE_MINT};

/// What a strategy sees at the start of an iteration
#[derive(Debug, Clone)]
pub struct Observation {
    /// Zero-based iteration index
    pub iteration: u32,
    pub iterations: u32,
    pub wallet_address: String,
    /// Native balance in SOL
    pub balance: Decimal,
    pub tokens: Vec<TokenBalance>,
}

impl Observation {
    /// UI balance of `mint`, zero when not held
    pub fn token_amount(&self, mint: &str) -> Decimal {
        self.tokens
            .iter()
            .find(|t| t.mint == mint)
            .map(|t| t.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

/// A concrete transaction a strategy wants sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    Transfer {
        destination: String,
        /// SOL
        amount: Decimal,
    },
    Swap {
        program_id: String,
        input_mint: String,
        output_mint: String,
        /// UI units of the input mint
        amount: Decimal,
        input_decimals: u8,
    },
}

impl Intent {
    /// SOL leaving the wallet; selling tokens for SOL costs nothing
    pub fn sol_cost(&self) -> Decimal {
        match self {
            Intent::Transfer { amount, .. } => *amount,
            Intent::Swap {
                input_mint, amount, ..
            } if input_mint == NATIVE_MINT => *amount,
            Intent::Swap { .. } => Decimal::ZERO,
        }
    }

    /// Unsigned transaction owned by `owner`
    pub fn to_transaction(&self, owner: &str) -> Result<Transaction> {
        let instruction = match self {
            Intent::Transfer {
                destination,
                amount,
            } => Instruction::system_transfer(owner, destination, sol_to_lamports(*amount)?),
            Intent::Swap {
                program_id,
                input_mint,
                output_mint,
                amount,
                input_decimals,
            } => {
                let base_units = if input_mint == NATIVE_MINT {
                    sol_to_lamports(*amount)?
                } else {
                    (*amount * Decimal::from(10u64.pow(*input_decimals as u32)))
                        .trunc()
                        .to_u64()
                        .ok_or_else(|| {
                            SigilError::Validation(format!("swap amount out of range: {}", amount))
                        })?
                };
                Instruction::swap(
                    owner,
                    program_id,
                    &SwapData {
                        input_mint: input_mint.clone(),
                        output_mint: output_mint.clone(),
                        amount: base_units,
                    },
                )?
            }
        };
        Ok(Transaction::new(vec![instruction]))
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Transfer {
                destination,
                amount,
            } => write!(f, "transfer {} SOL to {}", amount, destination),
            Intent::Swap {
                input_mint,
                output_mint,
                amount,
                ..
            } => write!(f, "swap {} {} -> {}", amount, input_mint, output_mint),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Act(Intent),
    Hold,
}

/// Strategy output plus a human-readable reason
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub rationale: String,
}

impl Decision {
    pub fn act(intent: Intent, rationale: impl Into<String>) -> Self {
        Self {
            action: Action::Act(intent),
            rationale: rationale.into(),
        }
    }

    pub fn hold(rationale: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            rationale: rationale.into(),
        }
    }
}

/// A pluggable decision policy driven by the execution loop
#[async_trait]
pub trait Decide: Send {
    fn name(&self) -> &str;

    async fn decide(&mut self, observation: &Observation) -> Result<Decision>;
}

/// Spending ceiling consulted around each action
#[async_trait]
pub trait SpendGuard: Send + Sync {
    /// Fail if `amount` would exceed the ceiling; no state change
    async fn check(&self, amount: Decimal) -> Result<()>;

    /// Record confirmed spend, re-checking the ceiling
    async fn record(&self, amount: Decimal) -> Result<()>;
}
