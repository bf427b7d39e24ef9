// Candle acquisition, the hourly coordinator and the position lifecycle
pub mod candle_store;
pub mod position_manager;
pub mod price_feed;
pub mod scheduler;

pub use candle_store::{CandleData, CandleStore, Upsert};
pub use position_manager::{
    CloseOutcome, OpenOutcome, OpenPosition, Position, PositionManager, TradeSettings,
};
pub use price_feed::{PriceFeed, RetryPolicy};
pub use scheduler::{AcquisitionScheduler, RefreshOutcome, SchedulerSettings, TickReport, TradingState};
