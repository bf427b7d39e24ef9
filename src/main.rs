use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use trendbot::api::{ExchangeGateway, ExmoClient};
use trendbot::backfill::{backfill_history, catch_up};
use trendbot::config::Settings;
use trendbot::execution::{
    AcquisitionScheduler, CandleData, CandleStore, PositionManager, PriceFeed, TradingState,
};
use trendbot::notify::{LogNotifier, NoChart, Notifier, TelegramNotifier};
use trendbot::persistence::{FileSnapshotStore, RedisSnapshotStore, SnapshotStore};
use trendbot::strategy::unique_pairs;
use trendbot::{BotError, Pair};

#[derive(Debug, Parser)]
#[command(name = "trendbot", about = "Hourly moving-average trend bot for EXMO")]
struct Args {
    /// Config file (defaults to ./trendbot.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drop stored candles and download the full history again
    #[arg(long)]
    rebackfill: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    let strategies = settings
        .parsed_strategies()
        .context("Invalid strategy list")?;
    let pairs = unique_pairs(&strategies);

    tracing::info!("🚀 trendbot starting");
    for strategy in &strategies {
        tracing::info!("  - {}", strategy);
    }

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(
        ExmoClient::new(
            settings.exmo_base_url.clone(),
            settings.exmo_key.clone(),
            settings.exmo_secret.clone(),
            settings.request_spacing(),
        )
        .context("Failed to build exchange client")?,
    );
    let feed = PriceFeed::new(gateway, settings.resolution);
    let store = open_store(&settings).await?;
    let notifier = build_notifier(&settings)?;

    let positions = PositionManager::restore(
        feed.clone(),
        store.clone(),
        notifier,
        Arc::new(NoChart),
        settings.trade_settings(),
    )
    .await
    .context("Refusing to start: persisted position could not be restored")?;

    let candles = load_candles(&settings, &feed, store.as_ref(), &pairs, args.rebackfill).await?;

    let mut scheduler = AcquisitionScheduler::new(
        feed,
        store,
        strategies,
        settings.scheduler_settings(),
        TradingState { candles, positions },
    );

    tokio::select! {
        _ = scheduler.run() => {
            tracing::error!("Scheduler loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
    }

    tracing::info!("👋 trendbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    match &settings.redis_url {
        Some(url) => {
            let store = RedisSnapshotStore::new(url, "trendbot")
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            Ok(Arc::new(store))
        }
        None => {
            let store = FileSnapshotStore::new(&settings.state_dir)
                .await
                .with_context(|| format!("Failed to open state dir {}", settings.state_dir.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn build_notifier(settings: &Settings) -> anyhow::Result<Arc<dyn Notifier>> {
    match (&settings.telegram_token, &settings.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            tracing::info!("Notifications go to Telegram chat {}", chat_id);
            Ok(Arc::new(
                TelegramNotifier::new(token.clone(), chat_id.clone())
                    .context("Failed to build Telegram client")?,
            ))
        }
        _ => {
            tracing::info!("No Telegram credentials, notifications are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Restore each pair's series and bring it up to date
///
/// A pair whose history cannot be downloaded starts with what it has; the
/// hourly refresh keeps extending it.
async fn load_candles(
    settings: &Settings,
    feed: &PriceFeed,
    store: &dyn SnapshotStore,
    pairs: &[Pair],
    rebackfill: bool,
) -> anyhow::Result<CandleStore> {
    let now = Utc::now();
    let mut candles = CandleStore::new();

    for pair in pairs {
        let restored = if rebackfill {
            None
        } else {
            match CandleData::restore(pair, settings.resolution, store).await {
                Ok(data) => data,
                Err(e @ BotError::PersistedStateCorrupt { .. }) => {
                    tracing::warn!(pair = %pair, error = %e, "Discarding unreadable candle snapshot");
                    None
                }
                Err(e) => return Err(e).context(format!("Failed to read candles of {}", pair)),
            }
        };

        let mut data = restored.unwrap_or_else(|| CandleData::new(pair.clone(), settings.resolution));
        let result = if data.is_empty() {
            backfill_history(
                feed,
                store,
                &mut data,
                now,
                settings.history_months,
                settings.backfill_window_hours,
            )
            .await
        } else {
            catch_up(
                feed,
                store,
                &mut data,
                now,
                settings.history_months,
                settings.backfill_window_hours,
            )
            .await
        };

        if let Err(e) = result {
            tracing::warn!(pair = %pair, error = %e, candles = data.len(), "History download failed");
        }
        candles.insert(data);
    }

    Ok(candles)
}
