// Technical indicators module
// Moving-average families (SMA, EMA, DEMA, TEMA, TEMA-zero) computed incrementally

pub mod engine;
pub mod moving_average;

pub use engine::{IndicatorCache, IndicatorType};
pub use moving_average::{ema_step, sma_step};
