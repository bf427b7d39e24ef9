use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::exmo::EXMO_API_BASE;
use crate::execution::{RetryPolicy, SchedulerSettings, TradeSettings};
use crate::models::Resolution;
use crate::strategy::{parse_strategies, Strategy};
use crate::Result;

const DEFAULT_CONFIG_FILE: &str = "trendbot.toml";
const ENV_PREFIX: &str = "TRENDBOT";

/// Bot settings, layered: defaults < config file < `TRENDBOT_*` environment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exmo_key: String,
    pub exmo_secret: String,
    pub exmo_base_url: String,
    /// Strategy list `{PAIR OP CL|T BAR N|T BAR N}{…}`
    pub strategies: String,
    pub available_deposit: f64,
    pub stop_loss_ratio: f64,
    pub resolution: Resolution,
    pub state_dir: PathBuf,
    pub redis_url: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub fetch_attempts: u32,
    pub fetch_backoff_secs: u64,
    pub empty_price_retry_secs: u64,
    pub request_spacing_ms: u64,
    pub history_months: u32,
    pub backfill_window_hours: u32,
    pub tick_offset_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exmo_key: String::new(),
            exmo_secret: String::new(),
            exmo_base_url: EXMO_API_BASE.to_string(),
            strategies: String::new(),
            available_deposit: 1.0,
            stop_loss_ratio: 0.8,
            resolution: Resolution::Hour,
            state_dir: PathBuf::from("./state"),
            redis_url: None,
            telegram_token: None,
            telegram_chat_id: None,
            fetch_attempts: 10,
            fetch_backoff_secs: 5,
            empty_price_retry_secs: 30,
            request_spacing_ms: 50,
            history_months: 2,
            backfill_window_hours: 125,
            tick_offset_secs: 5,
        }
    }
}

impl Settings {
    /// Load from `path` (required) or `trendbot.toml` (optional) plus the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(self.available_deposit > 0.0 && self.available_deposit <= 1.0) {
            return Err(ConfigError::Message(format!(
                "available_deposit must be in (0, 1], got {}",
                self.available_deposit
            ))
            .into());
        }
        if !(self.stop_loss_ratio > 0.0 && self.stop_loss_ratio < 1.0) {
            return Err(ConfigError::Message(format!(
                "stop_loss_ratio must be in (0, 1), got {}",
                self.stop_loss_ratio
            ))
            .into());
        }
        if self.backfill_window_hours == 0 {
            return Err(ConfigError::Message("backfill_window_hours must be positive".into()).into());
        }
        Ok(())
    }

    pub fn parsed_strategies(&self) -> Result<Vec<Strategy>> {
        parse_strategies(&self.strategies)
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_attempts, Duration::from_secs(self.fetch_backoff_secs))
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn trade_settings(&self) -> TradeSettings {
        TradeSettings {
            available_deposit: self.available_deposit,
            stop_loss_ratio: self.stop_loss_ratio,
            price_policy: self.fetch_policy(),
            empty_price_retry: Duration::from_secs(self.empty_price_retry_secs),
            ..TradeSettings::default()
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            fetch_policy: self.fetch_policy(),
            tick_offset: Duration::from_secs(self.tick_offset_secs),
            ..SchedulerSettings::default()
        }
    }
}
