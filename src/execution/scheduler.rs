use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::candle_store::{CandleData, CandleStore, Upsert};
use super::position_manager::{CloseOutcome, OpenOutcome, Position, PositionManager};
use super::price_feed::{PriceFeed, RetryPolicy};
use crate::models::{Pair, Resolution};
use crate::persistence::SnapshotStore;
use crate::strategy::{unique_pairs, OpenSignal, Strategy, StrategyEvaluator};
use crate::{BotError, Result};

/// What the refresh phase did for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { appended: usize, merged: usize },
    /// No candles after all attempts; series left as it was
    Skipped,
}

/// Everything one tick did, in order
#[derive(Debug, Default)]
pub struct TickReport {
    pub refreshed: Vec<(Pair, RefreshOutcome)>,
    /// Pairs whose refresh failed, stored series left untouched
    pub failed: Vec<Pair>,
    pub signals: Vec<(Pair, OpenSignal)>,
    pub open: Option<OpenOutcome>,
    pub close: Option<CloseOutcome>,
    /// Errors from position transitions, in the order they happened
    pub errors: Vec<(Pair, BotError)>,
}

impl TickReport {
    pub fn was_refreshed(&self, pair: &Pair) -> bool {
        self.refreshed
            .iter()
            .any(|(p, outcome)| p == pair && matches!(outcome, RefreshOutcome::Updated { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub fetch_policy: RetryPolicy,
    /// Delay after the bucket boundary before a tick starts
    pub tick_offset: Duration,
    pub max_workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            fetch_policy: RetryPolicy::new(10, Duration::from_secs(5)),
            tick_offset: Duration::from_secs(5),
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Candle series and the position, owned by the coordinator
pub struct TradingState {
    pub candles: CandleStore,
    pub positions: PositionManager,
}

/// Periodic coordinator: parallel refresh of every pair, then one serialized
/// evaluation pass in strategy declaration order
pub struct AcquisitionScheduler {
    feed: PriceFeed,
    store: Arc<dyn SnapshotStore>,
    strategies: Vec<Strategy>,
    pairs: Vec<Pair>,
    settings: SchedulerSettings,
    state: TradingState,
}

impl AcquisitionScheduler {
    pub fn new(
        feed: PriceFeed,
        store: Arc<dyn SnapshotStore>,
        strategies: Vec<Strategy>,
        settings: SchedulerSettings,
        state: TradingState,
    ) -> Self {
        let pairs = unique_pairs(&strategies);
        Self {
            feed,
            store,
            strategies,
            pairs,
            settings,
            state,
        }
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn state(&self) -> &TradingState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TradingState {
        &mut self.state
    }

    fn resolution(&self) -> Resolution {
        self.feed.resolution()
    }

    /// Run one tick as if the clock read `now`
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        self.refresh_all(now, &mut report).await;
        self.evaluate(now, &mut report).await;

        report
    }

    async fn refresh_all(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let workers = self.settings.max_workers.min(self.pairs.len()).max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let resolution = self.resolution();
        let policy = self.settings.fetch_policy;

        let mut tasks = JoinSet::new();
        for pair in &self.pairs {
            let held = self.state.candles.take(pair);
            let pair = pair.clone();
            let feed = self.feed.clone();
            let store = self.store.clone();
            let permits = permits.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();

                let mut data = match held {
                    Some(data) => data,
                    None => match CandleData::restore(&pair, resolution, store.as_ref()).await {
                        Ok(Some(data)) => data,
                        Ok(None) => CandleData::new(pair.clone(), resolution),
                        // Refreshing a blank series would save it over the snapshot
                        Err(e) => return (pair, None, Err(e)),
                    },
                };
                let outcome = refresh_pair(&feed, store.as_ref(), &mut data, now, policy).await;
                (pair, Some(data), outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (pair, data, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The series comes back from its snapshot next tick
                    tracing::error!(error = %e, "Refresh worker died");
                    continue;
                }
            };
            let Some(data) = data else {
                if let Err(e) = outcome {
                    tracing::error!(pair = %pair, error = %e, "Stored candles unreadable, pair skipped this tick");
                }
                report.failed.push(pair);
                continue;
            };

            match outcome {
                Ok(RefreshOutcome::Skipped) => {
                    tracing::warn!(pair = %pair, candles = data.len(), "No new candle, pair skipped this tick");
                    report.refreshed.push((pair, RefreshOutcome::Skipped));
                }
                Ok(outcome) => {
                    tracing::debug!(pair = %pair, candles = data.len(), ?outcome, "Pair refreshed");
                    report.refreshed.push((pair, outcome));
                }
                Err(e) => {
                    tracing::warn!(pair = %pair, error = %e, "Refresh failed, pair skipped this tick");
                    report.failed.push(pair);
                }
            }
            self.state.candles.insert(data);
        }
    }

    async fn evaluate(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let positions = &mut self.state.positions;

        if let Some(pair) = positions.unsaved().cloned() {
            if let Err(e) = positions.flush().await {
                report.errors.push((pair, e));
            }
        }

        if let Position::Open(open) = positions.position() {
            let pair = open.pair.clone();
            if let Err(e) = positions.ensure_protected().await {
                tracing::error!(pair = %pair, error = %e, "Stop recovery failed");
                report.errors.push((pair.clone(), e));
            }
            match positions.try_close(now).await {
                Ok(outcome) => report.close = Some(outcome),
                Err(e) => {
                    tracing::error!(pair = %pair, error = %e, "Close attempt failed, retrying next tick");
                    report.errors.push((pair, e));
                }
            }
            return;
        }

        let chart_candles = positions.settings().chart_candles;
        for strategy in &self.strategies {
            if !report.was_refreshed(&strategy.pair) {
                continue;
            }
            let Some(data) = self.state.candles.get_mut(&strategy.pair) else {
                continue;
            };
            let Some(index) = data.index() else {
                continue;
            };

            let signal = StrategyEvaluator::open_signal(data, strategy, index);
            tracing::info!(
                pair = %strategy.pair,
                index,
                v1 = ?signal.v1,
                v2 = ?signal.v2,
                ratio_bps = ?signal.ratio_bps,
                open_bps = strategy.open_bps,
                open = signal.open,
                "Strategy decision"
            );
            report.signals.push((strategy.pair.clone(), signal));

            if !signal.open {
                continue;
            }

            let recent = data.recent(chart_candles).to_vec();
            match positions.try_open(strategy, &recent, now).await {
                Ok(outcome) => {
                    let opened = matches!(
                        outcome,
                        OpenOutcome::Opened(_) | OpenOutcome::OpenedUnprotected { .. }
                    );
                    report.open = Some(outcome);
                    if opened {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(pair = %strategy.pair, error = %e, "Open attempt failed");
                    report.errors.push((strategy.pair.clone(), e));
                    // Bought but not saved still holds the one position slot
                    if positions.is_open() {
                        break;
                    }
                }
            }
        }
    }

    /// Tick once per bucket, `tick_offset` after each boundary, forever
    pub async fn run(&mut self) {
        let period = Duration::from_secs(self.resolution().seconds().max(1) as u64);
        let wait = until_next_tick(Utc::now(), self.resolution(), self.settings.tick_offset);
        let mut ticker = interval_at(Instant::now() + wait, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            pairs = self.pairs.len(),
            strategies = self.strategies.len(),
            resolution = self.resolution().name(),
            "Scheduler started"
        );

        loop {
            ticker.tick().await;
            let now = Utc::now();
            tracing::info!(at = %now, "Tick");

            let report = self.tick_at(now).await;
            tracing::info!(
                refreshed = report.refreshed.len(),
                failed = report.failed.len(),
                errors = report.errors.len(),
                signals = report.signals.len(),
                open = ?report.open,
                close = ?report.close,
                "Tick done"
            );
        }
    }
}

/// Fetch the buckets after the last stored one up to the last completed one
pub async fn refresh_pair(
    feed: &PriceFeed,
    store: &dyn SnapshotStore,
    data: &mut CandleData,
    now: DateTime<Utc>,
    policy: RetryPolicy,
) -> Result<RefreshOutcome> {
    let resolution = data.resolution();
    let to = resolution.bucket_at(now, -1);
    let from = data
        .last()
        .map(|c| c.time.timestamp() + resolution.seconds())
        .unwrap_or(to)
        .min(to);

    let Some(candles) = feed.fetch_range(data.pair(), from, to, policy).await? else {
        return Ok(RefreshOutcome::Skipped);
    };

    let (mut appended, mut merged) = (0, 0);
    for candle in candles {
        match data.upsert(candle) {
            Upsert::Appended => appended += 1,
            Upsert::Merged => merged += 1,
            Upsert::Stale => {}
        }
    }
    data.save(store).await?;

    Ok(RefreshOutcome::Updated { appended, merged })
}

/// Time from `now` to `offset` past the next bucket boundary
pub fn until_next_tick(now: DateTime<Utc>, resolution: Resolution, offset: Duration) -> Duration {
    let next = resolution.bucket_at(now, 1);
    Utc.timestamp_opt(next, 0)
        .single()
        .and_then(|boundary| (boundary - now).to_std().ok())
        .unwrap_or_default()
        + offset
}
