use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange error in {method}: {msg}")]
    Exchange { method: String, msg: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid strategy `{input}`: {reason}")]
    InvalidStrategy { input: String, reason: String },

    #[error("persisted state under `{key}` is corrupt: {reason}")]
    PersistedStateCorrupt { key: String, reason: String },

    #[error("position already open on {0}")]
    PositionAlreadyOpen(String),

    #[error("request signing failed: {0}")]
    Signing(String),
}

impl BotError {
    pub fn exchange(method: &str, msg: impl Into<String>) -> Self {
        Self::Exchange {
            method: method.to_string(),
            msg: msg.into(),
        }
    }

    pub fn invalid_strategy(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
