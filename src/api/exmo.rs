use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha512;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Balances, ExchangeGateway, OrderOutcome, StopOrderId, StopOutcome};
use crate::error::BotError;
use crate::models::{Candle, Pair, Resolution};
use crate::Result;

pub const EXMO_API_BASE: &str = "https://api.exmo.com/v1.1";

type ExmoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    candles: Vec<ExmoCandle>,
}

#[derive(Debug, Deserialize)]
struct ExmoCandle {
    /// Bucket start in milliseconds
    t: i64,
    o: f64,
    c: f64,
    h: f64,
    l: f64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    order_id: u64,
}

#[derive(Debug, Deserialize)]
struct StopOrderResponse {
    #[serde(default)]
    parent_order_id: u64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    balances: HashMap<String, String>,
}

/// Envelope of a failed private call: `{"result": false, "error": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    result: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorEnvelope {
    fn failure(&self) -> Option<&str> {
        match (&self.result, self.error.as_deref()) {
            (_, Some(msg)) if !msg.is_empty() => Some(msg),
            (Some(false), _) => Some("request failed"),
            _ => None,
        }
    }
}

// ============== Implementation ==============

/// Signed client for the EXMO v1.1 API
///
/// Every call is a form-encoded POST whose body carries a strictly increasing
/// `nonce` and is signed with HMAC-SHA512 of the secret. Calls are spaced by
/// the configured interval, shared by all clones.
#[derive(Clone)]
pub struct ExmoClient {
    client: Client,
    base_url: String,
    key: String,
    secret: String,
    last_nonce: Arc<AtomicU64>,
    rate_limiter: Option<Arc<ExmoRateLimiter>>,
}

impl ExmoClient {
    pub fn new(
        base_url: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
        request_spacing: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let rate_limiter =
            Quota::with_period(request_spacing).map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            secret: secret.into(),
            last_nonce: Arc::new(AtomicU64::new(0)),
            rate_limiter,
        })
    }

    fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);

        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn sign(&self, body: &str) -> Result<String> {
        let mut mac = Hmac::<Sha512>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| BotError::Signing(e.to_string()))?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signed POST to `{base}/{method}`, decoded as `T`
    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        // The serializer is not Send and must be gone before the first await
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("nonce", &self.next_nonce().to_string());
            for (name, value) in params {
                form.append_pair(name, value);
            }
            form.finish()
        };
        let sign = self.sign(&body)?;

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .header("Key", &self.key)
            .header("Sign", sign)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BotError::exchange(method, format!("HTTP {}: {}", status, text)));
        }

        tracing::trace!(method, body = %text, "Exchange response");
        serde_json::from_str(&text)
            .map_err(|e| BotError::exchange(method, format!("undecodable response: {} ({})", e, text)))
    }

    /// Like `call`, but an error envelope is an `Err`
    async fn call_checked<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let value: serde_json::Value = self.call(method, params).await?;

        if let Ok(envelope) = serde_json::from_value::<ErrorEnvelope>(value.clone()) {
            if let Some(msg) = envelope.failure() {
                return Err(BotError::exchange(method, msg));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| BotError::exchange(method, format!("unexpected response: {}", e)))
    }
}

/// Trigger prices are sent with at most 8 decimals
fn format_trigger_price(price: f64) -> String {
    format!("{:.8}", (price * 1e8).round() / 1e8)
}

#[async_trait]
impl ExchangeGateway for ExmoClient {
    async fn fetch_candles(
        &self,
        pair: &Pair,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Candle>> {
        let params = [
            ("symbol", pair.to_string()),
            ("resolution", resolution.api_code().to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];
        let response: CandlesResponse = self.call("candles_history", &params).await?;

        if response.s.as_deref() == Some("error") {
            let msg = response.errmsg.unwrap_or_else(|| "unknown error".to_string());
            return Err(BotError::exchange("candles_history", msg));
        }

        Ok(response
            .candles
            .into_iter()
            .map(|c| Candle::new(c.t.div_euclid(1000), c.o, c.h, c.l, c.c).aligned(resolution))
            .collect())
    }

    async fn place_market_buy(&self, pair: &Pair, quote_amount: f64) -> Result<OrderOutcome> {
        let params = [
            ("pair", pair.to_string()),
            ("quantity", quote_amount.to_string()),
            ("price", "0".to_string()),
            ("type", "market_buy_total".to_string()),
        ];
        let response: OrderResponse = self.call("order_create", &params).await?;
        Ok(order_outcome(response))
    }

    async fn place_market_sell(&self, pair: &Pair, base_amount: f64) -> Result<OrderOutcome> {
        let params = [
            ("pair", pair.to_string()),
            ("quantity", base_amount.to_string()),
            ("price", "0".to_string()),
            ("type", "market_sell".to_string()),
        ];
        let response: OrderResponse = self.call("order_create", &params).await?;
        Ok(order_outcome(response))
    }

    async fn place_stop_order(
        &self,
        pair: &Pair,
        base_amount: f64,
        trigger_price: f64,
    ) -> Result<StopOutcome> {
        let params = [
            ("pair", pair.to_string()),
            ("quantity", base_amount.to_string()),
            ("trigger_price", format_trigger_price(trigger_price)),
            ("type", "sell".to_string()),
        ];
        let response: StopOrderResponse = self.call("stop_market_order_create", &params).await?;

        if response.parent_order_id > 0 {
            Ok(StopOutcome::Placed {
                stop_order_id: response.parent_order_id,
            })
        } else {
            Ok(StopOutcome::Rejected {
                reason: response
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "no stop order id returned".to_string()),
            })
        }
    }

    async fn cancel_stop_order(&self, stop_order_id: StopOrderId) -> Result<()> {
        let params = [("parent_order_id", stop_order_id.to_string())];
        let _: serde_json::Value = self
            .call_checked("stop_market_order_cancel", &params)
            .await?;
        Ok(())
    }

    async fn balances(&self) -> Result<Balances> {
        let response: UserInfoResponse = self.call_checked("user_info", &[]).await?;

        response
            .balances
            .into_iter()
            .map(|(code, amount)| {
                amount
                    .trim()
                    .parse::<f64>()
                    .map(|amount| (code.clone(), amount))
                    .map_err(|_| {
                        BotError::exchange("user_info", format!("bad balance for {}: {}", code, amount))
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(|amounts| amounts.into_iter().collect())
    }
}

fn order_outcome(response: OrderResponse) -> OrderOutcome {
    if response.error.is_empty() {
        OrderOutcome::Placed {
            order_id: response.order_id,
        }
    } else {
        OrderOutcome::Rejected {
            reason: response.error,
        }
    }
}
