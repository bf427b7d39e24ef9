pub mod exmo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Candle, Pair, Resolution};
use crate::Result;

pub use exmo::ExmoClient;

/// Exchange-side id of a standing stop order
pub type StopOrderId = u64;

/// Result of a market order request the exchange answered
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Placed { order_id: u64 },
    Rejected { reason: String },
}

/// Result of a stop order request the exchange answered
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Placed { stop_order_id: StopOrderId },
    Rejected { reason: String },
}

/// Free balances by currency code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances(HashMap<String, f64>);

impl Balances {
    pub fn new(amounts: HashMap<String, f64>) -> Self {
        Self(
            amounts
                .into_iter()
                .map(|(code, amount)| (code.to_uppercase(), amount))
                .collect(),
        )
    }

    /// Amount held in `currency`; currencies the exchange did not report are 0
    pub fn get(&self, currency: &str) -> f64 {
        self.0.get(&currency.to_uppercase()).copied().unwrap_or(0.0)
    }
}

impl FromIterator<(String, f64)> for Balances {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Everything the trading core needs from an exchange
///
/// `Err` means the request itself failed (network, HTTP status, undecodable
/// body or an error payload); an order the exchange declined is an `Ok`
/// rejection.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Candles with bucket start in `[from, to]` (unix seconds), oldest
    /// first; empty when the exchange has nothing yet
    async fn fetch_candles(
        &self,
        pair: &Pair,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Candle>>;

    /// Buy spending `quote_amount` of the quote currency
    async fn place_market_buy(&self, pair: &Pair, quote_amount: f64) -> Result<OrderOutcome>;

    /// Sell `base_amount` of the base currency
    async fn place_market_sell(&self, pair: &Pair, base_amount: f64) -> Result<OrderOutcome>;

    /// Standing sell of `base_amount` triggered when price falls to `trigger_price`
    async fn place_stop_order(
        &self,
        pair: &Pair,
        base_amount: f64,
        trigger_price: f64,
    ) -> Result<StopOutcome>;

    async fn cancel_stop_order(&self, stop_order_id: StopOrderId) -> Result<()>;

    async fn balances(&self) -> Result<Balances>;
}
