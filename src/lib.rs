// Core modules
pub mod api;
pub mod backfill;
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use error::BotError;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
