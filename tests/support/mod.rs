#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trendbot::api::{Balances, ExchangeGateway, OrderOutcome, StopOrderId, StopOutcome};
use trendbot::execution::{PositionManager, PriceFeed, RetryPolicy, TradeSettings};
use trendbot::notify::{NoChart, Notifier};
use trendbot::persistence::{MemorySnapshotStore, SnapshotStore};
use trendbot::{Candle, Pair, Resolution, Result};

pub const HOUR: i64 = 3_600;

/// Bucket index `bucket` plus a few seconds, like a tick right after the boundary
pub fn at_bucket(bucket: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(bucket * HOUR + 5, 0).unwrap()
}

pub fn candle(bucket: i64, open: f64, close: f64) -> Candle {
    Candle::new(bucket * HOUR, open, open.max(close) + 0.5, open.min(close) - 0.5, close)
}

pub fn etc() -> Pair {
    Pair::new("ETC", "USDT")
}

pub fn algo() -> Pair {
    Pair::new("ALGO", "USDT")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch { pair: Pair, from: i64, to: i64 },
    Buy { pair: Pair, quote_amount: f64 },
    Sell { pair: Pair, base_amount: f64 },
    Stop { pair: Pair, base_amount: f64, trigger_price: f64 },
    Cancel(StopOrderId),
    Balances,
}

#[derive(Default)]
struct Script {
    candles: HashMap<Pair, BTreeMap<i64, Candle>>,
    empty_fetches: HashMap<Pair, u32>,
    balances: HashMap<String, f64>,
    reject_buys: bool,
    reject_sells: bool,
    stop_rejections: u32,
    next_id: u64,
    calls: Vec<Call>,
}

impl Script {
    fn last_price(&self, pair: &Pair) -> f64 {
        self.candles
            .get(pair)
            .and_then(|c| c.values().next_back())
            .map(|c| c.open)
            .unwrap_or(1.0)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory exchange whose answers the test scripts
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_candles(&self, pair: &Pair, candles: impl IntoIterator<Item = Candle>) {
        let mut script = self.script.lock().unwrap();
        let series = script.candles.entry(pair.clone()).or_default();
        for candle in candles {
            series.insert(candle.time.timestamp(), candle);
        }
    }

    /// The next `count` fetches for `pair` come back empty
    pub fn empty_fetches(&self, pair: &Pair, count: u32) {
        self.script
            .lock()
            .unwrap()
            .empty_fetches
            .insert(pair.clone(), count);
    }

    pub fn set_balance(&self, currency: &str, amount: f64) {
        self.script
            .lock()
            .unwrap()
            .balances
            .insert(currency.to_string(), amount);
    }

    pub fn balance(&self, currency: &str) -> f64 {
        self.script
            .lock()
            .unwrap()
            .balances
            .get(currency)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn reject_buys(&self, reject: bool) {
        self.script.lock().unwrap().reject_buys = reject;
    }

    pub fn reject_sells(&self, reject: bool) {
        self.script.lock().unwrap().reject_sells = reject;
    }

    pub fn reject_stops(&self, count: u32) {
        self.script.lock().unwrap().stop_rejections = count;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn fetches_for(&self, pair: &Pair) -> usize {
        self.count(|c| matches!(c, Call::Fetch { pair: p, .. } if p == pair))
    }

    pub fn buys(&self) -> usize {
        self.count(|c| matches!(c, Call::Buy { .. }))
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn fetch_candles(
        &self,
        pair: &Pair,
        _resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Candle>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Fetch {
            pair: pair.clone(),
            from,
            to,
        });

        if let Some(remaining) = script.empty_fetches.get_mut(pair) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Vec::new());
            }
        }

        Ok(script
            .candles
            .get(pair)
            .map(|series| series.range(from..=to).map(|(_, c)| *c).collect())
            .unwrap_or_default())
    }

    async fn place_market_buy(&self, pair: &Pair, quote_amount: f64) -> Result<OrderOutcome> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Buy {
            pair: pair.clone(),
            quote_amount,
        });
        if script.reject_buys {
            return Ok(OrderOutcome::Rejected {
                reason: "buy disabled".to_string(),
            });
        }

        let price = script.last_price(pair);
        *script.balances.entry(pair.quote.clone()).or_default() -= quote_amount;
        *script.balances.entry(pair.base.clone()).or_default() += quote_amount / price;
        let order_id = script.next_id();
        Ok(OrderOutcome::Placed { order_id })
    }

    async fn place_market_sell(&self, pair: &Pair, base_amount: f64) -> Result<OrderOutcome> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Sell {
            pair: pair.clone(),
            base_amount,
        });
        if script.reject_sells {
            return Ok(OrderOutcome::Rejected {
                reason: "sell disabled".to_string(),
            });
        }

        let price = script.last_price(pair);
        *script.balances.entry(pair.base.clone()).or_default() -= base_amount;
        *script.balances.entry(pair.quote.clone()).or_default() += base_amount * price;
        let order_id = script.next_id();
        Ok(OrderOutcome::Placed { order_id })
    }

    async fn place_stop_order(
        &self,
        pair: &Pair,
        base_amount: f64,
        trigger_price: f64,
    ) -> Result<StopOutcome> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Stop {
            pair: pair.clone(),
            base_amount,
            trigger_price,
        });
        if script.stop_rejections > 0 {
            script.stop_rejections -= 1;
            return Ok(StopOutcome::Rejected {
                reason: "stop disabled".to_string(),
            });
        }

        let stop_order_id = script.next_id();
        Ok(StopOutcome::Placed { stop_order_id })
    }

    async fn cancel_stop_order(&self, stop_order_id: StopOrderId) -> Result<()> {
        self.script
            .lock()
            .unwrap()
            .calls
            .push(Call::Cancel(stop_order_id));
        Ok(())
    }

    async fn balances(&self) -> Result<Balances> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Balances);
        Ok(script.balances.clone().into_iter().collect())
    }
}

/// Keeps every notification for inspection
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_opened(
        &self,
        pair: &Pair,
        price: f64,
        stop_loss_price: Option<f64>,
        _chart: Option<PathBuf>,
    ) -> Result<()> {
        let stop = stop_loss_price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "NONE".to_string());
        self.messages
            .lock()
            .unwrap()
            .push(format!("BUY {} {} {}", pair, price, stop));
        Ok(())
    }

    async fn notify_closed(&self, pair: &Pair, price: f64) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("SELL {} {}", pair, price));
        Ok(())
    }

    async fn notify_alert(&self, pair: &Pair, problem: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("ALERT {} {}", pair, problem));
        Ok(())
    }
}

/// Memory store whose reads or writes fail for keys with a given prefix
#[derive(Default)]
pub struct FaultyStore {
    inner: MemorySnapshotStore,
    failing_loads: Mutex<Vec<String>>,
    failing_saves: Mutex<Vec<String>>,
}

impl FaultyStore {
    pub fn fail_loads(&self, prefix: &str) {
        self.failing_loads.lock().unwrap().push(prefix.to_string());
    }

    pub fn fail_saves(&self, prefix: &str) {
        self.failing_saves.lock().unwrap().push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing_loads.lock().unwrap().clear();
        self.failing_saves.lock().unwrap().clear();
    }

    fn check(rules: &Mutex<Vec<String>>, key: &str) -> Result<()> {
        if rules.lock().unwrap().iter().any(|p| key.starts_with(p.as_str())) {
            return Err(std::io::Error::other(format!("{} unavailable", key)).into());
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FaultyStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Self::check(&self.failing_loads, key)?;
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        Self::check(&self.failing_saves, key)?;
        self.inner.save(key, bytes).await
    }
}

pub fn fast_trade_settings() -> TradeSettings {
    TradeSettings {
        price_policy: RetryPolicy::new(3, Duration::ZERO),
        empty_price_retry: Duration::ZERO,
        ..TradeSettings::default()
    }
}

pub struct Harness {
    pub gateway: ScriptedGateway,
    pub store: Arc<FaultyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub feed: PriceFeed,
}

impl Harness {
    pub fn new() -> Self {
        let gateway = ScriptedGateway::new();
        let feed = PriceFeed::new(Arc::new(gateway.clone()), Resolution::Hour);
        Self {
            gateway,
            store: Arc::new(FaultyStore::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            feed,
        }
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }

    pub async fn positions(&self) -> PositionManager {
        PositionManager::restore(
            self.feed.clone(),
            self.store(),
            self.notifier.clone(),
            Arc::new(NoChart),
            fast_trade_settings(),
        )
        .await
        .unwrap()
    }
}
