use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BotError;
use crate::indicators::{IndicatorCache, IndicatorType};
use crate::models::{BarType, Candle, Pair, Resolution};
use crate::persistence::{candles_key, load_json, save_json, SnapshotStore};
use crate::Result;

/// What `upsert` did with a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New bucket appended at the end
    Appended,
    /// Same bucket as the last one; close/high/low merged in
    Merged,
    /// Older than the last bucket; ignored
    Stale,
}

#[derive(Debug, Serialize, Deserialize)]
struct CandleSnapshot {
    pair: Pair,
    resolution: Resolution,
    candles: Vec<Candle>,
}

/// Ordered candle series for one pair and resolution, with the derived
/// bar-type series and the indicator cache built over it
///
/// Buckets are strictly increasing. Only the last bucket may change; every
/// derived series is a prefix of what a full recomputation would produce.
#[derive(Debug, Clone)]
pub struct CandleData {
    pair: Pair,
    resolution: Resolution,
    candles: Vec<Candle>,
    bars: HashMap<BarType, Vec<f64>>,
    indicators: IndicatorCache,
}

impl CandleData {
    pub fn new(pair: Pair, resolution: Resolution) -> Self {
        Self {
            pair,
            resolution,
            candles: Vec::new(),
            bars: HashMap::new(),
            indicators: IndicatorCache::new(),
        }
    }

    /// Build a series from already ordered candles (e.g. a backtest fixture)
    pub fn from_candles(pair: Pair, resolution: Resolution, candles: Vec<Candle>) -> Self {
        let mut data = Self::new(pair, resolution);
        for candle in candles {
            data.upsert(candle);
        }
        data
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// The N most recent candles, oldest first
    pub fn recent(&self, n: usize) -> &[Candle] {
        &self.candles[self.candles.len().saturating_sub(n)..]
    }

    /// Last index usable by indicators
    pub fn index(&self) -> Option<usize> {
        self.candles.len().checked_sub(1)
    }

    /// Insert or merge a candle by bucket
    ///
    /// A candle in the last stored bucket keeps the stored open and takes the
    /// new close, the wider high/low. A later bucket is appended (gaps are
    /// tolerated). An earlier bucket is ignored.
    pub fn upsert(&mut self, candle: Candle) -> Upsert {
        let candle = candle.aligned(self.resolution);

        let Some(last) = self.candles.last_mut() else {
            self.candles.push(candle);
            return Upsert::Appended;
        };

        if candle.time > last.time {
            self.candles.push(candle);
            return Upsert::Appended;
        }

        if candle.time < last.time {
            tracing::debug!(
                pair = %self.pair,
                bucket = %candle.time,
                last = %last.time,
                "Ignoring candle older than the last bucket"
            );
            return Upsert::Stale;
        }

        last.close = candle.close;
        last.high = last.high.max(candle.high);
        last.low = last.low.min(candle.low);

        // Derived values at the rewritten bucket are stale
        let keep = self.candles.len() - 1;
        for series in self.bars.values_mut() {
            series.truncate(keep);
        }
        self.indicators.truncate(keep);

        Upsert::Merged
    }

    /// Bar-type series extended to the current candle count
    pub fn bar_series(&mut self, bar: BarType) -> &[f64] {
        extend_bars(&mut self.bars, &self.candles, bar)
    }

    /// Indicator value at `index`, `None` while below its lookback
    pub fn indicator(
        &mut self,
        kind: IndicatorType,
        period: usize,
        bar: BarType,
        index: usize,
    ) -> Option<f64> {
        let input = extend_bars(&mut self.bars, &self.candles, bar);
        self.indicators.value(kind, period, bar, input, index)
    }

    pub fn snapshot_key(&self) -> String {
        candles_key(&self.pair, self.resolution)
    }

    /// Persist the candle list; derived series are rebuilt after restore
    pub async fn save(&self, store: &dyn SnapshotStore) -> Result<()> {
        let snapshot = CandleSnapshot {
            pair: self.pair.clone(),
            resolution: self.resolution,
            candles: self.candles.clone(),
        };
        save_json(store, &self.snapshot_key(), &snapshot).await?;

        tracing::debug!(pair = %self.pair, candles = self.candles.len(), "Saved candle snapshot");
        Ok(())
    }

    /// Load a previously saved series
    ///
    /// `Ok(None)` when nothing was saved. A blob that does not decode, belongs
    /// to another pair or breaks bucket ordering is `PersistedStateCorrupt`.
    pub async fn restore(
        pair: &Pair,
        resolution: Resolution,
        store: &dyn SnapshotStore,
    ) -> Result<Option<Self>> {
        let key = candles_key(pair, resolution);
        let Some(snapshot) = load_json::<CandleSnapshot>(store, &key).await? else {
            return Ok(None);
        };

        let corrupt = |reason: String| BotError::PersistedStateCorrupt {
            key: key.clone(),
            reason,
        };

        if &snapshot.pair != pair || snapshot.resolution != resolution {
            return Err(corrupt(format!(
                "snapshot holds {} {:?}",
                snapshot.pair, snapshot.resolution
            )));
        }
        if let Some(pos) = snapshot
            .candles
            .windows(2)
            .position(|w| w[1].time <= w[0].time)
        {
            return Err(corrupt(format!("bucket order broken at candle {}", pos + 1)));
        }

        let mut data = Self::new(pair.clone(), resolution);
        data.candles = snapshot.candles;

        tracing::info!(pair = %pair, candles = data.len(), "Restored candle snapshot");
        Ok(Some(data))
    }
}

fn extend_bars<'a>(
    bars: &'a mut HashMap<BarType, Vec<f64>>,
    candles: &[Candle],
    bar: BarType,
) -> &'a [f64] {
    let series = bars.entry(bar).or_default();
    for candle in &candles[series.len()..] {
        series.push(candle.bar(bar));
    }
    series
}

/// All candle series of the process, one per pair
///
/// A refresh worker takes a pair's series out, owns it while fetching, and
/// hands it back; nothing else touches that series meanwhile.
#[derive(Debug, Default)]
pub struct CandleStore {
    series: HashMap<Pair, CandleData>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, data: CandleData) {
        self.series.insert(data.pair().clone(), data);
    }

    pub fn take(&mut self, pair: &Pair) -> Option<CandleData> {
        self.series.remove(pair)
    }

    pub fn get(&self, pair: &Pair) -> Option<&CandleData> {
        self.series.get(pair)
    }

    pub fn get_mut(&mut self, pair: &Pair) -> Option<&mut CandleData> {
        self.series.get_mut(pair)
    }

    /// Candle count for a pair (0 when unknown)
    pub fn candle_count(&self, pair: &Pair) -> usize {
        self.series.get(pair).map(CandleData::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySnapshotStore;

    const HOUR: i64 = 3_600;

    fn pair() -> Pair {
        Pair::new("ETC", "USDT")
    }

    fn candle(bucket: i64, open: f64, close: f64) -> Candle {
        Candle::new(bucket * HOUR, open, open.max(close), open.min(close), close)
    }

    #[test]
    fn test_new_series() {
        let data = CandleData::new(pair(), Resolution::Hour);
        assert!(data.is_empty());
        assert_eq!(data.index(), None);
    }

    #[test]
    fn test_one_bucket_one_candle() {
        let mut data = CandleData::new(pair(), Resolution::Hour);

        assert_eq!(data.upsert(candle(1, 10.0, 11.0)), Upsert::Appended);
        assert_eq!(data.upsert(candle(1, 10.5, 12.0)), Upsert::Merged);
        assert_eq!(data.upsert(candle(1, 10.5, 12.0)), Upsert::Merged);
        assert_eq!(data.upsert(candle(2, 12.0, 13.0)), Upsert::Appended);
        assert_eq!(data.upsert(candle(5, 13.0, 14.0)), Upsert::Appended);

        assert_eq!(data.len(), 3);
        assert_eq!(data.index(), Some(2));
    }

    #[test]
    fn test_merge_keeps_open() {
        let mut data = CandleData::new(pair(), Resolution::Hour);
        data.upsert(Candle::new(HOUR, 10.0, 11.0, 9.0, 10.5));
        data.upsert(Candle::new(HOUR + 600, 99.0, 12.0, 9.5, 11.5));

        let last = data.last().unwrap();
        assert_eq!(last.open, 10.0);
        assert_eq!(last.close, 11.5);
        assert_eq!(last.high, 12.0);
        assert_eq!(last.low, 9.0);
        assert_eq!(last.time.timestamp(), HOUR);
    }

    #[test]
    fn test_older_bucket_is_ignored() {
        let mut data = CandleData::new(pair(), Resolution::Hour);
        data.upsert(candle(3, 10.0, 11.0));
        data.upsert(candle(4, 11.0, 12.0));

        assert_eq!(data.upsert(candle(3, 50.0, 50.0)), Upsert::Stale);
        assert_eq!(data.len(), 2);
        assert_eq!(data.candles()[0].close, 11.0);
    }

    #[test]
    fn test_merge_invalidates_last_indicator_value() {
        let mut data = CandleData::new(pair(), Resolution::Hour);
        data.upsert(candle(1, 1.0, 1.0));
        data.upsert(candle(2, 2.0, 2.0));
        data.upsert(candle(3, 3.0, 3.0));
        assert_eq!(data.indicator(IndicatorType::Sma, 3, BarType::C, 2), Some(2.0));

        data.upsert(candle(3, 3.0, 6.0));
        assert_eq!(data.indicator(IndicatorType::Sma, 3, BarType::C, 2), Some(3.0));
        assert_eq!(data.bar_series(BarType::C), &[1.0, 2.0, 6.0]);
    }

    #[test]
    fn test_derived_series_follow_appends() {
        let mut data = CandleData::new(pair(), Resolution::Hour);
        for (i, close) in [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().enumerate() {
            data.upsert(candle(i as i64, close, close));
        }
        assert_eq!(data.bar_series(BarType::C).len(), 5);

        data.upsert(candle(9, 6.0, 6.0));
        assert_eq!(data.bar_series(BarType::C), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(data.indicator(IndicatorType::Sma, 3, BarType::C, 4), Some(4.0));
    }

    #[test]
    fn test_recent_candles() {
        let mut data = CandleData::new(pair(), Resolution::Hour);
        for i in 0..10 {
            data.upsert(candle(i, 100.0 + i as f64, 100.0 + i as f64));
        }

        let recent = data.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].close, 107.0);
        assert_eq!(recent[2].close, 109.0);
        assert_eq!(data.recent(50).len(), 10);
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let store = MemorySnapshotStore::new();
        let mut data = CandleData::new(pair(), Resolution::Hour);
        for i in 0..4 {
            data.upsert(candle(i, 1.0 + i as f64, 2.0 + i as f64));
        }
        data.save(&store).await.unwrap();

        let mut restored = CandleData::restore(&pair(), Resolution::Hour, &store)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.candles(), data.candles());
        assert_eq!(
            restored.indicator(IndicatorType::Ema, 2, BarType::C, 3),
            data.indicator(IndicatorType::Ema, 2, BarType::C, 3)
        );
    }

    #[tokio::test]
    async fn test_restore_missing_is_none() {
        let store = MemorySnapshotStore::new();
        let restored = CandleData::restore(&pair(), Resolution::Hour, &store)
            .await
            .unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn test_restore_rejects_unordered_snapshot() {
        let store = MemorySnapshotStore::new();
        let snapshot = CandleSnapshot {
            pair: pair(),
            resolution: Resolution::Hour,
            candles: vec![candle(2, 1.0, 1.0), candle(1, 1.0, 1.0)],
        };
        save_json(&store, &candles_key(&pair(), Resolution::Hour), &snapshot)
            .await
            .unwrap();

        let result = CandleData::restore(&pair(), Resolution::Hour, &store).await;
        assert!(matches!(result, Err(BotError::PersistedStateCorrupt { .. })));
    }

    #[test]
    fn test_store_take_and_insert() {
        let mut store = CandleStore::new();
        let mut data = CandleData::new(pair(), Resolution::Hour);
        data.upsert(candle(1, 1.0, 1.0));
        store.insert(data);

        assert_eq!(store.candle_count(&pair()), 1);
        let taken = store.take(&pair()).unwrap();
        assert_eq!(store.candle_count(&pair()), 0);
        store.insert(taken);
        assert_eq!(store.len(), 1);
    }
}
