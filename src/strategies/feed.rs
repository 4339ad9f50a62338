use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::ledger::SimulatedLedger;

/// Quote tokens per SOL
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Advance the feed and return the new price
    async fn next_price(&self) -> Result<Decimal>;
}

/// Floor so the walk never reaches zero
fn min_price() -> Decimal {
    Decimal::new(1, 2)
}

struct WalkState {
    price: Decimal,
    rng: StdRng,
}

/// Random walk price source for dev networks
///
/// Each tick moves the price by a uniform step of at most `volatility_bps`
/// basis points. When attached to a [`SimulatedLedger`] every tick is
/// mirrored into it so swaps settle at the quoted price.
pub struct SimulatedPriceFeed {
    state: Mutex<WalkState>,
    volatility_bps: i64,
    ledger: Option<Arc<SimulatedLedger>>,
}

impl SimulatedPriceFeed {
    pub fn new(initial: Decimal, volatility_bps: u32) -> Self {
        Self::with_rng(initial, volatility_bps, StdRng::from_entropy())
    }

    /// Reproducible walk
    pub fn seeded(initial: Decimal, volatility_bps: u32, seed: u64) -> Self {
        Self::with_rng(initial, volatility_bps, StdRng::seed_from_u64(seed))
    }

    /// A feed that never moves
    pub fn fixed(price: Decimal) -> Self {
        Self::seeded(price, 0, 0)
    }

    fn with_rng(initial: Decimal, volatility_bps: u32, rng: StdRng) -> Self {
        Self {
            state: Mutex::new(WalkState {
                price: initial.max(min_price()),
                rng,
            }),
            volatility_bps: volatility_bps as i64,
            ledger: None,
        }
    }

    pub fn mirror_to(mut self, ledger: Arc<SimulatedLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Jump to `price` on the next tick's starting point
    pub async fn set_price(&self, price: Decimal) {
        self.state.lock().await.price = price.max(min_price());
    }
}

#[async_trait]
impl PriceFeed for SimulatedPriceFeed {
    async fn next_price(&self) -> Result<Decimal> {
        let price = {
            let mut state = self.state.lock().await;
            if self.volatility_bps > 0 {
                let step = state.rng.gen_range(-self.volatility_bps..=self.volatility_bps);
                let factor = Decimal::ONE + Decimal::new(step, 4);
                state.price = (state.price * factor).round_dp(6).max(min_price());
            }
            state.price
        };

        if let Some(ledger) = &self.ledger {
            ledger.set_price(price).await;
        }
        trace!("Simulated price {}", price);
        Ok(price)
    }
}
