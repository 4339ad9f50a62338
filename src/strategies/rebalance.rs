use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::feed::PriceFeed;
use super::SwapRoute;
use crate::error::Result;
use crate::ledger::NATIVE_MINT;
use crate::runner::{Decide, Decision, Intent, Observation};

/// SOL kept back for fees when selling SOL down
fn fee_reserve() -> Decimal {
    Decimal::new(1, 2)
}

/// Keeps the SOL share of portfolio value within `target ± band`
pub struct BandRebalance {
    feed: Arc<dyn PriceFeed>,
    route: SwapRoute,
    target_share: Decimal,
    band: Decimal,
}

impl BandRebalance {
    pub fn new(feed: Arc<dyn PriceFeed>, route: SwapRoute, target_share: Decimal, band: Decimal) -> Self {
        Self {
            feed,
            route,
            target_share,
            band,
        }
    }
}

#[async_trait]
impl Decide for BandRebalance {
    fn name(&self) -> &str {
        "rebalance"
    }

    async fn decide(&mut self, observation: &Observation) -> Result<Decision> {
        let price = self.feed.next_price().await?;
        let quote = observation
            .tokens
            .iter()
            .find(|t| t.mint == self.route.quote_mint);
        let quote_amount = quote.map(|t| t.amount).unwrap_or(Decimal::ZERO);
        let quote_decimals = quote.map(|t| t.decimals).unwrap_or(6);

        let total = observation.balance + quote_amount / price;
        if total <= Decimal::ZERO {
            return Ok(Decision::hold("empty portfolio"));
        }
        let share = observation.balance / total;
        let upper = self.target_share + self.band;
        let lower = self.target_share - self.band;

        if share > upper {
            let excess = ((share - self.target_share) * total)
                .min(observation.balance - fee_reserve())
                .round_dp(9);
            if excess <= Decimal::ZERO {
                return Ok(Decision::hold("SOL overweight but inside fee reserve"));
            }
            return Ok(Decision::act(
                Intent::Swap {
                    program_id: self.route.program_id.clone(),
                    input_mint: NATIVE_MINT.to_string(),
                    output_mint: self.route.quote_mint.clone(),
                    amount: excess,
                    input_decimals: 9,
                },
                format!(
                    "SOL share {:.3} above {:.3}: selling {} SOL",
                    share, upper, excess
                ),
            ));
        }

        if share < lower {
            let deficit = ((self.target_share - share) * total * price)
                .min(quote_amount)
                .round_dp(quote_decimals as u32);
            if deficit <= Decimal::ZERO {
                return Ok(Decision::hold("SOL underweight with nothing to sell"));
            }
            return Ok(Decision::act(
                Intent::Swap {
                    program_id: self.route.program_id.clone(),
                    input_mint: self.route.quote_mint.clone(),
                    output_mint: NATIVE_MINT.to_string(),
                    amount: deficit,
                    input_decimals: quote_decimals,
                },
                format!(
                    "SOL share {:.3} below {:.3}: buying with {} quote",
                    share, lower, deficit
                ),
            ));
        }

        Ok(Decision::hold(format!(
            "SOL share {:.3} inside [{:.3}, {:.3}]",
            share, lower, upper
        )))
    }
}
