use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::runner::{Decide, Decision, Intent, Observation};

/// Sends the same transfer every iteration while the balance allows it
pub struct SimpleTransfer {
    destination: String,
    amount: Decimal,
}

impl SimpleTransfer {
    pub fn new(destination: impl Into<String>, amount: Decimal) -> Self {
        Self {
            destination: destination.into(),
            amount,
        }
    }
}

#[async_trait]
impl Decide for SimpleTransfer {
    fn name(&self) -> &str {
        "simple"
    }

    async fn decide(&mut self, observation: &Observation) -> Result<Decision> {
        if self.amount <= Decimal::ZERO {
            return Ok(Decision::hold("transfer amount is zero"));
        }
        if observation.balance <= self.amount {
            return Ok(Decision::hold(format!(
                "balance {} SOL does not cover {} SOL plus fees",
                observation.balance, self.amount
            )));
        }
        Ok(Decision::act(
            Intent::Transfer {
                destination: self.destination.clone(),
                amount: self.amount,
            },
            format!(
                "scheduled transfer {}/{}",
                observation.iteration + 1,
                observation.iterations
            ),
        ))
    }
}
