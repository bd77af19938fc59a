//! Performance metrics calculator.
//!
//! Statistics over a finished replay: trade outcomes, returns, drawdown and
//! risk-adjusted ratios.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestResult, EquityPoint, ExitReason, Trade};

use super::cagr::cagr_from_growth;

/// Performance metrics for one replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Trade outcomes
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub profit_factor: f64,
    pub avg_trade_pnl: Decimal,
    pub avg_winner: Decimal,
    pub avg_loser: Decimal,
    pub largest_winner: Decimal,
    pub largest_loser: Decimal,

    // Returns
    pub total_return_pct: f64,
    pub cagr: f64,

    // Risk
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub avg_drawdown: f64,
    pub drawdown_duration_days: i64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // Time
    pub trading_days: usize,
    pub avg_days_held: f64,
    pub expired_trades: usize,

    pub total_commission: Decimal,
    pub commission_pct_of_pnl: f64,
}

impl PerformanceMetrics {
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Trades: {} (W: {}, L: {}, expired: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             \n\
             Total P&L: ${:.2}\n\
             Avg Trade: ${:.2}\n\
             Avg Winner: ${:.2}\n\
             Avg Loser: ${:.2}\n\
             Largest Win: ${:.2}\n\
             Largest Loss: ${:.2}\n\
             \n\
             Total Return: {:.2}%\n\
             CAGR: {:.2}%\n\
             \n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             Calmar Ratio: {:.2}\n\
             \n\
             Avg Days Held: {:.1}\n\
             Commission: ${:.2} ({:.2}% of P&L)",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.expired_trades,
            self.win_rate * 100.0,
            self.profit_factor,
            self.total_pnl,
            self.avg_trade_pnl,
            self.avg_winner,
            self.avg_loser,
            self.largest_winner,
            self.largest_loser,
            self.total_return_pct,
            self.cagr,
            self.max_drawdown_pct,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.avg_days_held,
            self.total_commission,
            self.commission_pct_of_pnl
        )
    }
}

/// Drawdown details from an equity curve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    pub peak_date: Option<NaiveDate>,
    pub recovery_date: Option<NaiveDate>,
    pub duration_days: i64,
    pub avg_drawdown_pct: f64,
    pub drawdown_periods: usize,
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(result: &BacktestResult) -> PerformanceMetrics {
        let trades = &result.trades;
        let total_trades = trades.len();

        let largest_winner = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(|t| t.pnl)
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_loser = trades
            .iter()
            .filter(|t| !t.is_winner())
            .map(|t| t.pnl)
            .min()
            .unwrap_or(Decimal::ZERO);

        let cagr = Self::calculate_cagr(
            result.config.initial_cash,
            result.final_equity,
            result.start_date,
            result.end_date,
        );

        let drawdown = Self::analyze_drawdown(&result.equity_curve);
        let calmar_ratio = if drawdown.max_drawdown_pct > 0.0 {
            cagr / drawdown.max_drawdown_pct
        } else {
            0.0
        };

        let avg_days_held = if total_trades > 0 {
            trades.iter().map(|t| t.days_held() as f64).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };

        let commission_pct_of_pnl = if !result.total_pnl.is_zero() {
            let comm: f64 = result.total_commission.abs().try_into().unwrap_or(0.0);
            let pnl: f64 = result.total_pnl.abs().try_into().unwrap_or(1.0);
            comm / pnl * 100.0
        } else {
            0.0
        };

        PerformanceMetrics {
            total_trades,
            winning_trades: result.winning_trades,
            losing_trades: result.losing_trades,
            win_rate: result.win_rate(),
            total_pnl: result.total_pnl,
            gross_profit: result.gross_profit,
            gross_loss: result.gross_loss,
            profit_factor: result.profit_factor(),
            avg_trade_pnl: result.avg_trade_pnl(),
            avg_winner: result.avg_winner(),
            avg_loser: result.avg_loser(),
            largest_winner,
            largest_loser,
            total_return_pct: result.total_return_pct,
            cagr,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_pct: drawdown.max_drawdown_pct,
            avg_drawdown: drawdown.avg_drawdown_pct,
            drawdown_duration_days: drawdown.duration_days,
            sharpe_ratio: result.sharpe_ratio(),
            sortino_ratio: Self::calculate_sortino(&result.equity_curve),
            calmar_ratio,
            trading_days: result.trading_days,
            avg_days_held,
            expired_trades: Self::count_by_exit_reason(trades, ExitReason::Expired),
            total_commission: result.total_commission,
            commission_pct_of_pnl,
        }
    }

    /// CAGR in percent over the calendar span of the run.
    fn calculate_cagr(initial: Decimal, final_val: Decimal, start: NaiveDate, end: NaiveDate) -> f64 {
        let init: f64 = initial.try_into().unwrap_or(0.0);
        let fin: f64 = final_val.try_into().unwrap_or(0.0);
        if init <= 0.0 || fin <= 0.0 {
            return 0.0;
        }
        cagr_from_growth(fin / init, start, end).unwrap_or(0.0)
    }

    fn analyze_drawdown(equity_curve: &[EquityPoint]) -> DrawdownAnalysis {
        let Some(first) = equity_curve.first() else {
            return DrawdownAnalysis::default();
        };

        let mut peak = first.equity;
        let mut peak_date = first.date;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_pct = 0.0;
        let mut max_drawdown_date = first.date;
        let mut max_peak_date = first.date;
        let mut recovery_date = None;
        let mut drawdown_start: Option<NaiveDate> = None;
        let mut max_duration = 0i64;
        let mut drawdowns = Vec::new();
        let mut periods = 0;

        for point in equity_curve {
            if point.equity >= peak {
                if drawdown_start.take().is_some() {
                    periods += 1;
                    if max_peak_date == peak_date && !max_drawdown.is_zero() && recovery_date.is_none() {
                        recovery_date = Some(point.date);
                    }
                }
                peak = point.equity;
                peak_date = point.date;
                continue;
            }

            let drawdown = peak - point.equity;
            let drawdown_pct = if !peak.is_zero() {
                let dd: f64 = drawdown.try_into().unwrap_or(0.0);
                let pk: f64 = peak.try_into().unwrap_or(1.0);
                dd / pk * 100.0
            } else {
                0.0
            };

            let start = *drawdown_start.get_or_insert(peak_date);
            let duration = (point.date - start).num_days();
            max_duration = max_duration.max(duration);

            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                max_drawdown_pct = drawdown_pct;
                max_drawdown_date = point.date;
                max_peak_date = peak_date;
                recovery_date = None;
            }
            drawdowns.push(drawdown_pct);
        }

        let avg_drawdown_pct = if !drawdowns.is_empty() {
            drawdowns.iter().sum::<f64>() / drawdowns.len() as f64
        } else {
            0.0
        };

        DrawdownAnalysis {
            max_drawdown,
            max_drawdown_pct,
            max_drawdown_date: Some(max_drawdown_date),
            peak_date: Some(max_peak_date),
            recovery_date,
            duration_days: max_duration,
            avg_drawdown_pct,
            drawdown_periods: periods,
        }
    }

    /// Annualized Sortino on daily equity returns (target 0).
    fn calculate_sortino(equity_curve: &[EquityPoint]) -> f64 {
        if equity_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|w| {
                let prev: f64 = w[0].equity.try_into().unwrap_or(1.0);
                let curr: f64 = w[1].equity.try_into().unwrap_or(1.0);
                (curr - prev) / prev
            })
            .collect();

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let downside_variance = returns
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / returns.len() as f64;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 {
            return 0.0;
        }

        (mean * 252.0_f64.sqrt()) / downside_dev
    }

    fn count_by_exit_reason(trades: &[Trade], reason: ExitReason) -> usize {
        trades.iter().filter(|t| t.exit_reason == reason).count()
    }
}
