// Deterministic replay of a strategy over stored candle history
pub mod metrics;
pub mod runner;

pub use metrics::{BacktestMetrics, ExitReason, TradeRecord};
pub use runner::replay;
