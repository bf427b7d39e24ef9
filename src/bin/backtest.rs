use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use trendbot::backtest::replay;
use trendbot::config::Settings;
use trendbot::execution::CandleData;
use trendbot::persistence::FileSnapshotStore;
use trendbot::strategy::parse_strategies;

/// Replay strategies over the candle snapshots the bot has stored
#[derive(Debug, Parser)]
#[command(name = "backtest")]
struct Args {
    /// Strategy list, e.g. "{ETC_USDT 0 300|1 C 10|0 O 20}"
    #[arg(long)]
    strategy: String,

    /// Snapshot directory (defaults to the configured state_dir)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured stop-loss ratio
    #[arg(long)]
    stop_loss_ratio: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    let strategies = parse_strategies(&args.strategy).context("Invalid strategy")?;
    let stop_loss_ratio = args.stop_loss_ratio.unwrap_or(settings.stop_loss_ratio);

    let state_dir = args.state_dir.unwrap_or_else(|| settings.state_dir.clone());
    let store = FileSnapshotStore::new(&state_dir).await?;

    for strategy in &strategies {
        let mut data = CandleData::restore(&strategy.pair, settings.resolution, &store)
            .await?
            .with_context(|| {
                format!(
                    "No stored candles for {} in {} (run the bot once to backfill)",
                    strategy.pair,
                    state_dir.display()
                )
            })?;

        if data.len() < strategy.min_candles() {
            tracing::warn!(
                pair = %strategy.pair,
                candles = data.len(),
                needed = strategy.min_candles(),
                "Too few candles for the indicators to become defined"
            );
        }

        println!("\n{} over {} candles", strategy, data.len());
        let metrics = replay(strategy, &mut data, stop_loss_ratio);
        metrics.print_report();
    }

    Ok(())
}
