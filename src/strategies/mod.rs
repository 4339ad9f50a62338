//! Decision policies plugged into the execution loop

pub mod feed;
pub mod rebalance;
pub mod simple;
pub mod threshold;

pub use feed::{PriceFeed, SimulatedPriceFeed};
pub use rebalance::BandRebalance;
pub use simple::SimpleTransfer;
pub use threshold::PriceThreshold;

use std::sync::Arc;

use crate::config::StrategiesConfig;
use crate::custody::is_valid_public_key;
use crate::error::{Result, SigilError};
use crate::registry::StrategyKind;
use crate::runner::Decide;

/// Swap program and the token traded against SOL
#[derive(Debug, Clone)]
pub struct SwapRoute {
    pub program_id: String,
    pub quote_mint: String,
}

impl SwapRoute {
    pub fn new(program_id: impl Into<String>, quote_mint: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            quote_mint: quote_mint.into(),
        }
    }
}

/// Build the decider for `kind`. The simple strategy transfers back to
/// `wallet_address` unless a destination is configured.
pub fn build_decider(
    kind: StrategyKind,
    config: &StrategiesConfig,
    wallet_address: &str,
    feed: Arc<dyn PriceFeed>,
) -> Result<Box<dyn Decide>> {
    let route = SwapRoute::new(&config.swap_program, &config.quote_mint);

    let decider: Box<dyn Decide> = match kind {
        StrategyKind::Simple => {
            let destination = config
                .transfer_destination
                .clone()
                .unwrap_or_else(|| wallet_address.to_string());
            if !is_valid_public_key(&destination) {
                return Err(SigilError::Validation(format!(
                    "invalid transfer destination: {}",
                    destination
                )));
            }
            Box::new(SimpleTransfer::new(destination, config.transfer_amount))
        }
        StrategyKind::Trading => Box::new(PriceThreshold::new(
            feed,
            route,
            config.buy_below,
            config.sell_above,
            config.trade_amount,
        )),
        StrategyKind::Rebalance => Box::new(BandRebalance::new(
            feed,
            route,
            config.target_sol_share,
            config.band,
        )),
    };
    Ok(decider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::Keypair;
    use rust_decimal_macros::dec;

    #[test]
    fn builds_each_kind() {
        let config = StrategiesConfig::default();
        let wallet = Keypair::generate().public_key();
        let feed: Arc<dyn PriceFeed> = Arc::new(SimulatedPriceFeed::fixed(dec!(100)));

        for (kind, name) in [
            (StrategyKind::Simple, "simple"),
            (StrategyKind::Trading, "trading"),
            (StrategyKind::Rebalance, "rebalance"),
        ] {
            let decider = build_decider(kind, &config, &wallet, feed.clone()).unwrap();
            assert_eq!(decider.name(), name);
        }
    }

    #[test]
    fn rejects_malformed_destination() {
        let config = StrategiesConfig {
            transfer_destination: Some("not-a-key".to_string()),
            ..StrategiesConfig::default()
        };
        let feed: Arc<dyn PriceFeed> = Arc::new(SimulatedPriceFeed::fixed(dec!(100)));
        let result = build_decider(StrategyKind::Simple, &config, "ignored", feed);
        assert!(matches!(result, Err(SigilError::Validation(_))));
    }
}
