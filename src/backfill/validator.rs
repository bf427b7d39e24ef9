use chrono::{DateTime, Utc};

use crate::models::Candle;

/// Sanity checks for candles coming from the exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// `Err` with the reason when the candle should not be stored
    pub fn validate(&self, candle: &Candle, now: DateTime<Utc>) -> Result<(), String> {
        self.validate_prices(candle)?;
        self.validate_timestamp(candle, now)?;
        self.validate_ohlc_relationship(candle)
    }

    fn validate_prices(&self, candle: &Candle) -> Result<(), String> {
        for (name, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("invalid {} price: {}", name, value));
            }
        }
        Ok(())
    }

    fn validate_timestamp(&self, candle: &Candle, now: DateTime<Utc>) -> Result<(), String> {
        if candle.time > now {
            return Err(format!("bucket {} is in the future (now {})", candle.time, now));
        }
        Ok(())
    }

    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<(), String> {
        if candle.high < candle.low {
            return Err(format!("high ({}) below low ({})", candle.high, candle.low));
        }
        if candle.high < candle.open.max(candle.close) {
            return Err(format!(
                "high ({}) below open/close ({}/{})",
                candle.high, candle.open, candle.close
            ));
        }
        if candle.low > candle.open.min(candle.close) {
            return Err(format!(
                "low ({}) above open/close ({}/{})",
                candle.low, candle.open, candle.close
            ));
        }
        Ok(())
    }
}
