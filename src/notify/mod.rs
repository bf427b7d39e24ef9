// Outbound notifications about position transitions
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BotError;
use crate::models::{Candle, Pair};
use crate::Result;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Receives opens, closes and states that need a human
///
/// Failures are reported to the caller, which logs them; a failed
/// notification never undoes a transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `stop_loss_price` is `None` when the buy went through but no stop
    /// order is standing
    async fn notify_opened(
        &self,
        pair: &Pair,
        price: f64,
        stop_loss_price: Option<f64>,
        chart: Option<PathBuf>,
    ) -> Result<()>;

    async fn notify_closed(&self, pair: &Pair, price: f64) -> Result<()>;

    /// The position is exposed: no stop order, or its snapshot was not saved
    async fn notify_alert(&self, pair: &Pair, problem: &str) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_opened(
        &self,
        pair: &Pair,
        price: f64,
        stop_loss_price: Option<f64>,
        chart: Option<PathBuf>,
    ) -> Result<()> {
        match stop_loss_price {
            Some(stop_loss_price) => tracing::info!(
                pair = %pair,
                price,
                stop_loss_price,
                chart = ?chart,
                "BUY"
            ),
            None => tracing::error!(pair = %pair, price, chart = ?chart, "BUY WITHOUT STOP LOSS"),
        }
        Ok(())
    }

    async fn notify_closed(&self, pair: &Pair, price: f64) -> Result<()> {
        tracing::info!(pair = %pair, price, "SELL");
        Ok(())
    }

    async fn notify_alert(&self, pair: &Pair, problem: &str) -> Result<()> {
        tracing::error!(pair = %pair, problem, "ALERT");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn row(key: &str, value: impl std::fmt::Display) -> String {
    format!("<b>{}</b>: {}\n", key, value)
}

/// Posts HTML messages to a Telegram chat through the Bot API
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_base_url(TELEGRAM_API_BASE, token, chat_id)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    async fn send(&self, text: String) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let reply: TelegramResponse = response.json().await?;

        if !status.is_success() || !reply.ok {
            return Err(BotError::exchange(
                "sendMessage",
                reply
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_opened(
        &self,
        pair: &Pair,
        price: f64,
        stop_loss_price: Option<f64>,
        chart: Option<PathBuf>,
    ) -> Result<()> {
        let mut text = String::new();
        text.push_str(&row("Operation", "BUY"));
        text.push_str(&row("Pair", pair));
        text.push_str(&row("Price", price));
        match stop_loss_price {
            Some(stop_loss_price) => text.push_str(&row("SL", stop_loss_price)),
            None => text.push_str(&row("SL", "NONE, stop order failed")),
        }
        if let Some(chart) = chart {
            text.push_str(&row("Chart", chart.display()));
        }
        self.send(text).await
    }

    async fn notify_closed(&self, pair: &Pair, price: f64) -> Result<()> {
        let mut text = String::new();
        text.push_str(&row("Operation", "SELL"));
        text.push_str(&row("Pair", pair));
        text.push_str(&row("Price", price));
        self.send(text).await
    }

    async fn notify_alert(&self, pair: &Pair, problem: &str) -> Result<()> {
        let mut text = String::new();
        text.push_str(&row("Operation", "ALERT"));
        text.push_str(&row("Pair", pair));
        text.push_str(&row("Problem", problem));
        self.send(text).await
    }
}

/// Produces a chart of the recent candles with the exit levels marked
pub trait ChartRenderer: Send + Sync {
    fn render(
        &self,
        pair: &Pair,
        candles: &[Candle],
        take_profit: f64,
        stop_loss: f64,
    ) -> Result<Option<PathBuf>>;
}

/// Renders nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChart;

impl ChartRenderer for NoChart {
    fn render(&self, _: &Pair, _: &[Candle], _: f64, _: f64) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
