use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Close rule met at a bucket open
    TakeProfit,
    /// Bucket low reached the protective stop
    StopLoss,
}

/// Record of a single trade for analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub return_pct: f64,
    pub holding_period_hours: f64,
}

impl TradeRecord {
    pub fn new(
        entry_time: DateTime<Utc>,
        entry_price: f64,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Self {
        Self {
            entry_time,
            exit_time,
            entry_price,
            exit_price,
            exit_reason,
            return_pct: (exit_price / entry_price - 1.0) * 100.0,
            holding_period_hours: (exit_time - entry_time).num_seconds() as f64 / 3_600.0,
        }
    }

    pub fn is_win(&self) -> bool {
        self.exit_price > self.entry_price
    }
}

/// Performance of one strategy replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    /// Every trade reinvesting the whole balance
    pub compounded_return_pct: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub stop_loss_exits: usize,
    pub avg_holding_period_hours: f64,

    /// Entry still unresolved when the data ran out
    pub open_at_end: Option<(DateTime<Utc>, f64)>,
    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    pub fn from_trades(trades: Vec<TradeRecord>, open_at_end: Option<(DateTime<Utc>, f64)>) -> Self {
        let total_trades = trades.len();
        let wins: Vec<f64> = trades.iter().filter(|t| t.is_win()).map(|t| t.return_pct).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| !t.is_win()).map(|t| t.return_pct).collect();

        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let holding: Vec<f64> = trades.iter().map(|t| t.holding_period_hours).collect();

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            compounded_return_pct: Self::compounded_return(&trades),
            avg_win_pct: mean(&wins),
            avg_loss_pct: mean(&losses),
            max_drawdown_pct: Self::calculate_drawdown(&trades),
            stop_loss_exits: trades
                .iter()
                .filter(|t| t.exit_reason == ExitReason::StopLoss)
                .count(),
            avg_holding_period_hours: mean(&holding),
            open_at_end,
            trades,
        }
    }

    fn compounded_return(trades: &[TradeRecord]) -> f64 {
        let growth: f64 = trades.iter().map(|t| t.exit_price / t.entry_price).product();
        (growth - 1.0) * 100.0
    }

    /// Largest peak-to-trough fall of the compounded equity, in percent
    fn calculate_drawdown(trades: &[TradeRecord]) -> f64 {
        let mut equity = 1.0;
        let mut peak = 1.0;
        let mut max_dd: f64 = 0.0;

        for trade in trades {
            equity *= trade.exit_price / trade.entry_price;
            peak = f64::max(peak, equity);
            max_dd = max_dd.max((peak - equity) / peak);
        }

        max_dd * 100.0
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n=== BACKTEST REPORT ===\n");

        println!("📈 TRADES");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);
        println!("  Stop-Loss Exits:       {}", self.stop_loss_exits);

        println!("\n💰 RETURNS");
        println!("  Compounded Return:     {:+.2}%", self.compounded_return_pct);
        if self.total_trades > 0 {
            println!("  Average Win:           {:+.2}%", self.avg_win_pct);
            println!("  Average Loss:          {:+.2}%", self.avg_loss_pct);
            println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
            println!(
                "  Average Holding:       {:.1} hours",
                self.avg_holding_period_hours
            );
        }

        if let Some((time, price)) = self.open_at_end {
            println!("\n⏳ Still open since {} at {}", time, price);
        }

        for trade in &self.trades {
            println!(
                "  {} {:>12.6} -> {} {:>12.6} {:+7.2}% {:?}",
                trade.entry_time.format("%d.%m.%y %H:%M"),
                trade.entry_price,
                trade.exit_time.format("%d.%m.%y %H:%M"),
                trade.exit_price,
                trade.return_pct,
                trade.exit_reason
            );
        }
        println!();
    }
}
