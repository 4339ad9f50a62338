use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::feed::PriceFeed;
use super::SwapRoute;
use crate::error::Result;
use crate::ledger::NATIVE_MINT;
use crate::runner::{Decide, Decision, Intent, Observation};

/// Buy the quote token below one price, sell it back above another
pub struct PriceThreshold {
    feed: Arc<dyn PriceFeed>,
    route: SwapRoute,
    buy_below: Decimal,
    sell_above: Decimal,
    /// SOL per trade
    trade_amount: Decimal,
}

impl PriceThreshold {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        route: SwapRoute,
        buy_below: Decimal,
        sell_above: Decimal,
        trade_amount: Decimal,
    ) -> Self {
        Self {
            feed,
            route,
            buy_below,
            sell_above,
            trade_amount,
        }
    }
}

#[async_trait]
impl Decide for PriceThreshold {
    fn name(&self) -> &str {
        "trading"
    }

    async fn decide(&mut self, observation: &Observation) -> Result<Decision> {
        let price = self.feed.next_price().await?;

        if price < self.buy_below {
            if observation.balance <= self.trade_amount {
                return Ok(Decision::hold(format!(
                    "price {} below {} but balance {} SOL is too low to buy",
                    price, self.buy_below, observation.balance
                )));
            }
            return Ok(Decision::act(
                Intent::Swap {
                    program_id: self.route.program_id.clone(),
                    input_mint: NATIVE_MINT.to_string(),
                    output_mint: self.route.quote_mint.clone(),
                    amount: self.trade_amount,
                    input_decimals: 9,
                },
                format!("price {} below {}: buying", price, self.buy_below),
            ));
        }

        if price > self.sell_above {
            let held = observation
                .tokens
                .iter()
                .find(|t| t.mint == self.route.quote_mint);
            let Some(held) = held.filter(|t| t.amount > Decimal::ZERO) else {
                return Ok(Decision::hold(format!(
                    "price {} above {} but nothing to sell",
                    price, self.sell_above
                )));
            };
            let amount = (self.trade_amount * price)
                .min(held.amount)
                .round_dp(held.decimals as u32);
            return Ok(Decision::act(
                Intent::Swap {
                    program_id: self.route.program_id.clone(),
                    input_mint: self.route.quote_mint.clone(),
                    output_mint: NATIVE_MINT.to_string(),
                    amount,
                    input_decimals: held.decimals,
                },
                format!("price {} above {}: selling", price, self.sell_above),
            ));
        }

        Ok(Decision::hold(format!(
            "price {} inside [{}, {}]",
            price, self.buy_below, self.sell_above
        )))
    }
}
