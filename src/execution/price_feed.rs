use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::api::ExchangeGateway;
use crate::models::{Candle, Pair, Resolution};
use crate::Result;

/// How often to re-ask the exchange when it answers with no candles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Candle fetching with bounded retry on empty answers
///
/// Empty answers are expected around bucket boundaries (the exchange lags a
/// little), so they are retried and finally reported as `Ok(None)`. Transport
/// and API errors are returned immediately.
#[derive(Clone)]
pub struct PriceFeed {
    gateway: Arc<dyn ExchangeGateway>,
    resolution: Resolution,
}

impl PriceFeed {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, resolution: Resolution) -> Self {
        Self {
            gateway,
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    /// Candles in `[from, to]`, retried while the answer is empty
    pub async fn fetch_range(
        &self,
        pair: &Pair,
        from: i64,
        to: i64,
        policy: RetryPolicy,
    ) -> Result<Option<Vec<Candle>>> {
        for attempt in 1..=policy.max_attempts {
            let candles = self
                .gateway
                .fetch_candles(pair, self.resolution, from, to)
                .await?;

            if !candles.is_empty() {
                if attempt > 1 {
                    tracing::debug!(pair = %pair, attempt, "Candles arrived after retry");
                }
                return Ok(Some(candles));
            }

            if attempt < policy.max_attempts && !policy.backoff.is_zero() {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        tracing::debug!(
            pair = %pair,
            from,
            to,
            attempts = policy.max_attempts,
            "No candles after all attempts"
        );
        Ok(None)
    }

    /// The candle of the bucket `offset` buckets away from the one holding
    /// `now` (0 = still forming, -1 = last completed)
    pub async fn fetch_bucket(
        &self,
        pair: &Pair,
        now: DateTime<Utc>,
        offset: i64,
        policy: RetryPolicy,
    ) -> Result<Option<Candle>> {
        let bucket = self.resolution.bucket_at(now, offset);
        let candles = self.fetch_range(pair, bucket, bucket, policy).await?;
        Ok(candles.and_then(|c| c.into_iter().next()))
    }
}
