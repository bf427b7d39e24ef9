use crate::backtest::metrics::{BacktestMetrics, ExitReason, TradeRecord};
use crate::execution::candle_store::CandleData;
use crate::strategy::{should_close, Strategy, StrategyEvaluator};

struct Entry {
    index: usize,
    price: f64,
    stop: f64,
}

/// Replay `strategy` over a stored series the way the live bot trades it
///
/// While flat, an open signal at index i buys at candle i+1's open. While
/// open, each later candle's open is checked against the close rule first;
/// otherwise a low at or below the stop exits at the stop price. The stop
/// is live from the entry candle on.
pub fn replay(strategy: &Strategy, data: &mut CandleData, stop_loss_ratio: f64) -> BacktestMetrics {
    let n = data.len();
    let mut trades = Vec::new();
    let mut position: Option<Entry> = None;

    for j in 0..n {
        let candle = data.candles()[j];

        if let Some(entry) = &position {
            let exit = if j > entry.index && should_close(candle.open, entry.price, strategy.close_bps) {
                Some((candle.open, ExitReason::TakeProfit))
            } else if candle.low <= entry.stop {
                Some((entry.stop, ExitReason::StopLoss))
            } else {
                None
            };

            if let Some((price, reason)) = exit {
                let entry_time = data.candles()[entry.index].time;
                trades.push(TradeRecord::new(entry_time, entry.price, candle.time, price, reason));
                tracing::debug!(index = j, price, ?reason, "Backtest exit");
                position = None;
            }
        }

        if position.is_none() && j + 1 < n {
            let signal = StrategyEvaluator::open_signal(data, strategy, j);
            if signal.open {
                let price = data.candles()[j + 1].open;
                tracing::debug!(index = j + 1, price, ratio_bps = ?signal.ratio_bps, "Backtest entry");
                position = Some(Entry {
                    index: j + 1,
                    price,
                    stop: price * stop_loss_ratio,
                });
            }
        }
    }

    let open_at_end = position.map(|entry| (data.candles()[entry.index].time, entry.price));
    let metrics = BacktestMetrics::from_trades(trades, open_at_end);

    tracing::info!(
        pair = %strategy.pair,
        candles = n,
        trades = metrics.total_trades,
        compounded_return_pct = metrics.compounded_return_pct,
        "Replay finished"
    );
    metrics
}
