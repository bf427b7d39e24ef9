use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::price_feed::{PriceFeed, RetryPolicy};
use crate::api::{OrderOutcome, StopOrderId, StopOutcome};
use crate::error::BotError;
use crate::models::{Candle, Pair};
use crate::notify::{ChartRenderer, Notifier};
use crate::persistence::{load_json, save_json, SnapshotStore, POSITION_KEY};
use crate::strategy::{should_close, signals::ratio_bps, Strategy};
use crate::Result;

/// Money and timing knobs of the position lifecycle
#[derive(Debug, Clone)]
pub struct TradeSettings {
    /// Fraction of the quote balance spent per buy
    pub available_deposit: f64,
    /// Stop trigger as a fraction of the entry price
    pub stop_loss_ratio: f64,
    /// Retry policy for the current-bucket price fetch
    pub price_policy: RetryPolicy,
    /// Pause before the second close-price attempt
    pub empty_price_retry: Duration,
    /// Candles handed to the chart renderer
    pub chart_candles: usize,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            available_deposit: 1.0,
            stop_loss_ratio: 0.8,
            price_policy: RetryPolicy::new(10, Duration::from_secs(5)),
            empty_price_retry: Duration::from_secs(30),
            chart_candles: 48,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub pair: Pair,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    /// `None` while no protective stop is standing on the exchange
    pub stop_order_id: Option<StopOrderId>,
    pub opened_at: DateTime<Utc>,
    pub close_bps: i64,
}

impl OpenPosition {
    pub fn is_protected(&self) -> bool {
        self.stop_order_id.is_some()
    }

    pub fn take_profit_price(&self) -> f64 {
        self.entry_price * (10_000 + self.close_bps) as f64 / 10_000.0
    }
}

/// The one position of the process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Position {
    #[default]
    Flat,
    Open(OpenPosition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Bought and protected by a stop order
    Opened(OpenPosition),
    /// Bought, but the stop order could not be placed
    OpenedUnprotected { position: OpenPosition, reason: String },
    /// The exchange declined the buy; still flat
    Rejected { reason: String },
    /// No current price was available; nothing was sent
    NoPrice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed { price: f64 },
    /// Close rule not met at `price`
    Held { price: f64 },
    /// Stop was cancelled but the sell was declined; still open
    SellRejected { reason: String },
    NoPrice,
    Flat,
}

/// Flat/Open state machine executing decisions against the exchange
///
/// Every step that changes what the exchange holds is persisted before the
/// next request goes out. A failed write is alerted and returned as the
/// error of the transition once its exchange steps are done; the in-memory
/// position stays authoritative.
pub struct PositionManager {
    feed: PriceFeed,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    chart: Arc<dyn ChartRenderer>,
    settings: TradeSettings,
    position: Position,
    unsaved: Option<Pair>,
}

impl PositionManager {
    /// Load the persisted position; a missing snapshot means flat and a
    /// corrupt one is an error
    pub async fn restore(
        feed: PriceFeed,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        chart: Arc<dyn ChartRenderer>,
        settings: TradeSettings,
    ) -> Result<Self> {
        let position = load_json::<Position>(store.as_ref(), POSITION_KEY)
            .await?
            .unwrap_or_default();

        match &position {
            Position::Flat => tracing::info!("No open position"),
            Position::Open(open) => tracing::info!(
                pair = %open.pair,
                entry = open.entry_price,
                stop_loss = open.stop_loss_price,
                protected = open.is_protected(),
                "Restored open position"
            ),
        }

        Ok(Self {
            feed,
            store,
            notifier,
            chart,
            settings,
            position,
            unsaved: None,
        })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_open(&self) -> bool {
        matches!(self.position, Position::Open(_))
    }

    pub fn settings(&self) -> &TradeSettings {
        &self.settings
    }

    /// Write the position snapshot, alerting when it cannot be written
    ///
    /// Callers finish the exchange-side sequence before returning the error,
    /// so a failed write never leaves a bought position without its stop.
    async fn persist(&mut self, pair: &Pair) -> Result<()> {
        let result = save_json(self.store.as_ref(), POSITION_KEY, &self.position).await;
        match &result {
            Ok(()) => self.unsaved = None,
            Err(e) => {
                tracing::error!(error = %e, position = ?self.position, "Failed to persist position");
                self.unsaved = Some(pair.clone());
                self.alert(pair, &format!("position snapshot not saved: {}", e))
                    .await;
            }
        }
        result
    }

    /// Pair of the transition whose snapshot write failed, until a write
    /// succeeds
    pub fn unsaved(&self) -> Option<&Pair> {
        self.unsaved.as_ref()
    }

    /// Write the snapshot again if the last write failed
    pub async fn flush(&mut self) -> Result<()> {
        let Some(pair) = self.unsaved.clone() else {
            return Ok(());
        };
        self.persist(&pair).await?;
        tracing::info!(pair = %pair, "Position snapshot written after earlier failure");
        Ok(())
    }

    async fn alert(&self, pair: &Pair, problem: &str) {
        if let Err(e) = self.notifier.notify_alert(pair, problem).await {
            tracing::warn!(pair = %pair, error = %e, "Alert notification failed");
        }
    }

    /// Current-bucket candle, asked again once after a pause if empty
    async fn current_candle(
        &self,
        pair: &Pair,
        now: DateTime<Utc>,
        second_try: bool,
    ) -> Result<Option<Candle>> {
        let policy = self.settings.price_policy;
        if let Some(candle) = self.feed.fetch_bucket(pair, now, 0, policy).await? {
            return Ok(Some(candle));
        }
        if !second_try {
            return Ok(None);
        }

        tracing::warn!(
            pair = %pair,
            wait_secs = self.settings.empty_price_retry.as_secs(),
            "No current price, trying once more"
        );
        tokio::time::sleep(self.settings.empty_price_retry).await;
        self.feed.fetch_bucket(pair, now, 0, policy).await
    }

    /// Place the protective stop for the whole base balance
    async fn place_stop(&self, open: &OpenPosition) -> Result<StopOutcome> {
        let gateway = self.feed.gateway();
        let quantity = gateway.balances().await?.get(&open.pair.base);
        gateway
            .place_stop_order(&open.pair, quantity, open.stop_loss_price)
            .await
    }

    /// Buy `strategy.pair` at market and protect it with a stop order
    ///
    /// The entry price is the open of the bucket current at `now`, not the
    /// price the signal was computed on. `recent` feeds the chart.
    pub async fn try_open(
        &mut self,
        strategy: &Strategy,
        recent: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<OpenOutcome> {
        if let Position::Open(open) = &self.position {
            return Err(BotError::PositionAlreadyOpen(open.pair.to_string()));
        }

        let pair = &strategy.pair;
        let Some(candle) = self.current_candle(pair, now, false).await? else {
            tracing::warn!(pair = %pair, "No current price, not opening");
            return Ok(OpenOutcome::NoPrice);
        };
        let entry_price = candle.open;

        let gateway = self.feed.gateway();
        let spend = gateway.balances().await?.get(&pair.quote) * self.settings.available_deposit;
        if spend <= 0.0 {
            let reason = format!("no {} balance to spend", pair.quote);
            tracing::warn!(pair = %pair, "{}", reason);
            return Ok(OpenOutcome::Rejected { reason });
        }

        match gateway.place_market_buy(pair, spend).await? {
            OrderOutcome::Placed { order_id } => {
                tracing::info!(pair = %pair, order_id, spend, entry_price, "Buy order placed");
            }
            OrderOutcome::Rejected { reason } => {
                tracing::warn!(pair = %pair, spend, reason = %reason, "Buy order rejected");
                return Ok(OpenOutcome::Rejected { reason });
            }
        }

        let mut open = OpenPosition {
            pair: pair.clone(),
            entry_price,
            stop_loss_price: entry_price * self.settings.stop_loss_ratio,
            stop_order_id: None,
            opened_at: now,
            close_bps: strategy.close_bps,
        };
        self.position = Position::Open(open.clone());
        // Only the latest write matters: each snapshot holds the whole position
        let mut saved = self.persist(pair).await;
        tracing::info!(pair = %pair, entry_price, "Position Flat -> Open");

        let outcome = match self.place_stop(&open).await {
            Ok(StopOutcome::Placed { stop_order_id }) => {
                open.stop_order_id = Some(stop_order_id);
                self.position = Position::Open(open.clone());
                saved = self.persist(pair).await;
                tracing::info!(
                    pair = %pair,
                    stop_order_id,
                    stop_loss = open.stop_loss_price,
                    "Protective stop placed"
                );
                OpenOutcome::Opened(open.clone())
            }
            Ok(StopOutcome::Rejected { reason }) => self.unprotected(open.clone(), reason),
            Err(e) => self.unprotected(open.clone(), e.to_string()),
        };

        let chart = self
            .chart
            .render(pair, recent, open.take_profit_price(), open.stop_loss_price)
            .unwrap_or_else(|e| {
                tracing::warn!(pair = %pair, error = %e, "Chart rendering failed");
                None
            });
        let stop_loss = open.is_protected().then_some(open.stop_loss_price);
        if let Err(e) = self
            .notifier
            .notify_opened(pair, entry_price, stop_loss, chart)
            .await
        {
            tracing::warn!(pair = %pair, error = %e, "Open notification failed");
        }

        saved?;
        Ok(outcome)
    }

    fn unprotected(&self, position: OpenPosition, reason: String) -> OpenOutcome {
        tracing::error!(
            pair = %position.pair,
            stop_loss = position.stop_loss_price,
            reason = %reason,
            "POSITION OPEN WITHOUT STOP LOSS"
        );
        OpenOutcome::OpenedUnprotected { position, reason }
    }

    /// Re-place a missing protective stop; `true` when the position is flat
    /// or protected afterwards
    ///
    /// Every failed attempt raises an alert.
    pub async fn ensure_protected(&mut self) -> Result<bool> {
        let open = match &self.position {
            Position::Open(open) if !open.is_protected() => open.clone(),
            _ => return Ok(true),
        };

        let reason = match self.place_stop(&open).await {
            Ok(StopOutcome::Placed { stop_order_id }) => {
                let pair = open.pair.clone();
                self.position = Position::Open(OpenPosition {
                    stop_order_id: Some(stop_order_id),
                    ..open
                });
                tracing::info!(pair = %pair, stop_order_id, "Protective stop restored");
                self.persist(&pair).await?;
                return Ok(true);
            }
            Ok(StopOutcome::Rejected { reason }) => reason,
            Err(e) => e.to_string(),
        };

        self.alert(
            &open.pair,
            &format!(
                "still no stop order at {} ({})",
                open.stop_loss_price, reason
            ),
        )
        .await;
        self.unprotected(open, reason);
        Ok(false)
    }

    /// Sell the position when the current open is far enough above entry
    ///
    /// The stop order is cancelled first, then the full base balance is sold.
    /// A declined sell leaves the position open with no stop, which the next
    /// `ensure_protected` re-places.
    pub async fn try_close(&mut self, now: DateTime<Utc>) -> Result<CloseOutcome> {
        let Position::Open(open) = &self.position else {
            return Ok(CloseOutcome::Flat);
        };
        let open = open.clone();
        let pair = &open.pair;

        let Some(candle) = self.current_candle(pair, now, true).await? else {
            tracing::warn!(pair = %pair, "No current price, close check skipped");
            return Ok(CloseOutcome::NoPrice);
        };
        let price = candle.open;

        let close = should_close(price, open.entry_price, open.close_bps);
        tracing::info!(
            pair = %pair,
            price,
            entry = open.entry_price,
            ratio_bps = ?ratio_bps(price, open.entry_price),
            close_bps = open.close_bps,
            close,
            "Close check"
        );
        if !close {
            return Ok(CloseOutcome::Held { price });
        }

        let gateway = self.feed.gateway().clone();
        let mut saved = Ok(());
        if let Some(stop_order_id) = open.stop_order_id {
            gateway.cancel_stop_order(stop_order_id).await?;
            self.position = Position::Open(OpenPosition {
                stop_order_id: None,
                ..open.clone()
            });
            saved = self.persist(pair).await;
            tracing::info!(pair = %pair, stop_order_id, "Protective stop cancelled");
        }

        let quantity = gateway.balances().await?.get(&pair.base);
        if quantity <= 0.0 {
            let reason = format!("no {} balance to sell", pair.base);
            tracing::warn!(pair = %pair, "{}", reason);
            saved?;
            return Ok(CloseOutcome::SellRejected { reason });
        }

        let outcome = match gateway.place_market_sell(pair, quantity).await? {
            OrderOutcome::Placed { order_id } => {
                self.position = Position::Flat;
                saved = self.persist(pair).await;
                tracing::info!(pair = %pair, order_id, quantity, price, "Position Open -> Flat");

                if let Err(e) = self.notifier.notify_closed(pair, price).await {
                    tracing::warn!(pair = %pair, error = %e, "Close notification failed");
                }
                CloseOutcome::Closed { price }
            }
            OrderOutcome::Rejected { reason } => {
                tracing::warn!(pair = %pair, quantity, reason = %reason, "Sell order rejected, staying open");
                CloseOutcome::SellRejected { reason }
            }
        };

        saved?;
        Ok(outcome)
    }
}
