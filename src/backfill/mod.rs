pub mod validator;

use chrono::{DateTime, Months, Utc};

use crate::execution::candle_store::{CandleData, Upsert};
use crate::execution::price_feed::{PriceFeed, RetryPolicy};
use crate::persistence::SnapshotStore;
use crate::Result;

pub use validator::CandleValidator;

/// Statistics from a backfill operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillStats {
    pub windows: usize,
    pub empty_windows: usize,
    pub fetched: usize,
    pub appended: usize,
    pub merged: usize,
    pub validation_failures: usize,
}

/// Fill `data` with every bucket in `[from, to]`, asking for `window_secs`
/// at a time
///
/// Windows the exchange has nothing for are skipped. Invalid candles are
/// dropped and counted.
pub async fn backfill_range(
    feed: &PriceFeed,
    data: &mut CandleData,
    from: i64,
    to: i64,
    window_secs: i64,
    now: DateTime<Utc>,
) -> Result<BackfillStats> {
    let resolution = data.resolution();
    let window_secs = window_secs.max(resolution.seconds());
    let validator = CandleValidator::new();
    let mut stats = BackfillStats::default();

    let mut start = resolution.bucket_start(from);
    while start <= to {
        let end = (start + window_secs - resolution.seconds()).min(to);
        stats.windows += 1;

        let Some(candles) = feed
            .fetch_range(data.pair(), start, end, RetryPolicy::once())
            .await?
        else {
            stats.empty_windows += 1;
            start += window_secs;
            continue;
        };

        stats.fetched += candles.len();
        for candle in candles {
            if let Err(reason) = validator.validate(&candle, now) {
                tracing::warn!(pair = %data.pair(), bucket = %candle.time, reason = %reason, "Dropping invalid candle");
                stats.validation_failures += 1;
                continue;
            }
            match data.upsert(candle) {
                Upsert::Appended => stats.appended += 1,
                Upsert::Merged => stats.merged += 1,
                Upsert::Stale => {}
            }
        }

        tracing::debug!(pair = %data.pair(), start, end, candles = data.len(), "Backfill window done");
        start += window_secs;
    }

    Ok(stats)
}

/// Load `months` of history up to the last completed bucket and save it
pub async fn backfill_history(
    feed: &PriceFeed,
    store: &dyn SnapshotStore,
    data: &mut CandleData,
    now: DateTime<Utc>,
    months: u32,
    window_hours: u32,
) -> Result<BackfillStats> {
    let from = now
        .checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .timestamp();
    let to = data.resolution().bucket_at(now, -1);

    tracing::info!(pair = %data.pair(), months, "Backfilling history");
    let stats = backfill_range(feed, data, from, to, window_hours as i64 * 3_600, now).await?;
    data.save(store).await?;

    tracing::info!(
        pair = %data.pair(),
        candles = data.len(),
        windows = stats.windows,
        empty_windows = stats.empty_windows,
        dropped = stats.validation_failures,
        "✓ Backfill complete"
    );
    Ok(stats)
}

/// Fetch everything from the last stored bucket up to the last completed one
///
/// Falls back to a full history backfill when the series is empty.
pub async fn catch_up(
    feed: &PriceFeed,
    store: &dyn SnapshotStore,
    data: &mut CandleData,
    now: DateTime<Utc>,
    months: u32,
    window_hours: u32,
) -> Result<BackfillStats> {
    let Some(last) = data.last().map(|c| c.time.timestamp()) else {
        return backfill_history(feed, store, data, now, months, window_hours).await;
    };

    let to = data.resolution().bucket_at(now, -1);
    let stats = backfill_range(feed, data, last, to, window_hours as i64 * 3_600, now).await?;
    data.save(store).await?;

    tracing::info!(
        pair = %data.pair(),
        appended = stats.appended,
        candles = data.len(),
        "Caught up since last snapshot"
    );
    Ok(stats)
}
