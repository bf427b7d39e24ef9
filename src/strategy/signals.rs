use serde::Serialize;

use super::Strategy;
use crate::execution::candle_store::CandleData;

const BPS_BASE: f64 = 10_000.0;

/// `v1 / v2` scaled to basis points; `None` when it is not a usable number
pub fn ratio_bps(v1: f64, v2: f64) -> Option<f64> {
    if v2 == 0.0 {
        return None;
    }
    let ratio = v1 * BPS_BASE / v2;
    ratio.is_finite().then_some(ratio)
}

/// Open iff `v1 * 10000 / v2 >= 10000 + open_bps`
pub fn should_open(v1: f64, v2: f64, open_bps: i64) -> bool {
    ratio_bps(v1, v2).is_some_and(|ratio| ratio >= BPS_BASE + open_bps as f64)
}

/// Close iff `price * 10000 / entry >= 10000 + close_bps`
pub fn should_close(price: f64, entry: f64, close_bps: i64) -> bool {
    ratio_bps(price, entry).is_some_and(|ratio| ratio >= BPS_BASE + close_bps as f64)
}

/// Both indicator readings at one index and the resulting decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpenSignal {
    pub index: usize,
    pub v1: Option<f64>,
    pub v2: Option<f64>,
    pub ratio_bps: Option<f64>,
    pub open: bool,
}

/// Stateless combination of a strategy's two indicators
///
/// Reads go through the series' indicator cache, so the evaluator needs the
/// series mutably, but the decision depends only on the candles up to `index`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyEvaluator;

impl StrategyEvaluator {
    pub fn open_signal(data: &mut CandleData, strategy: &Strategy, index: usize) -> OpenSignal {
        let v1 = data.indicator(strategy.ind1.kind, strategy.ind1.period, strategy.ind1.bar, index);
        let v2 = data.indicator(strategy.ind2.kind, strategy.ind2.period, strategy.ind2.bar, index);

        let ratio = match (v1, v2) {
            (Some(v1), Some(v2)) => ratio_bps(v1, v2),
            _ => None,
        };
        let open = ratio.is_some_and(|r| r >= BPS_BASE + strategy.open_bps as f64);

        OpenSignal {
            index,
            v1,
            v2,
            ratio_bps: ratio,
            open,
        }
    }
}
