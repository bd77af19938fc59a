//! Replay engine.
//!
//! Drives a `Strategy` over chronological snapshots:
//! 1. On a date change, run the strategy's end-of-day hook and record equity
//! 2. Settle contracts that expired before today
//! 3. Re-mark the broker from the snapshot
//! 4. Apply the strategy's universe filter and hand it the slice
//!
//! When the data runs out the strategy's `on_end` summary is collected and
//! any remaining holdings are closed as `EndOfPeriod`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{DataLoader, LoaderError, OptionsSnapshot};
use crate::strategies::{Strategy, StrategyReport};

use super::broker::{Broker, PaperBroker};
use super::commission::CommissionModel;
use super::slippage::SlippageModel;
use super::trade::{ExitReason, Trade};

/// Account-level settings for a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting cash.
    pub initial_cash: Decimal,

    #[serde(default)]
    pub slippage: SlippageModel,

    #[serde(default)]
    pub commission: CommissionModel,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(100_000),
            slippage: SlippageModel::default(),
            commission: CommissionModel::default(),
        }
    }
}

/// Daily equity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub open_positions: usize,
    pub daily_pnl: Decimal,
}

/// Result of a completed replay.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub strategy: String,
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,

    pub final_equity: Decimal,
    pub total_return_pct: f64,
    pub trading_days: usize,
    pub peak_equity: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub total_commission: Decimal,
    pub fills: usize,

    /// The strategy's own end-of-run summary.
    pub report: StrategyReport,
}

impl BacktestResult {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64
    }

    pub fn profit_factor(&self) -> f64 {
        let loss: f64 = self.gross_loss.abs().try_into().unwrap_or(0.0);
        if loss == 0.0 {
            return f64::INFINITY;
        }
        let profit: f64 = self.gross_profit.try_into().unwrap_or(0.0);
        profit / loss
    }

    pub fn avg_trade_pnl(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        self.total_pnl / Decimal::from(self.total_trades as i64)
    }

    pub fn avg_winner(&self) -> Decimal {
        if self.winning_trades == 0 {
            return Decimal::ZERO;
        }
        self.gross_profit / Decimal::from(self.winning_trades as i64)
    }

    pub fn avg_loser(&self) -> Decimal {
        if self.losing_trades == 0 {
            return Decimal::ZERO;
        }
        self.gross_loss / Decimal::from(self.losing_trades as i64)
    }

    /// Annualized Sharpe on daily equity returns (risk-free rate = 0).
    pub fn sharpe_ratio(&self) -> f64 {
        if self.equity_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = self
            .equity_curve
            .windows(2)
            .map(|w| {
                let prev: f64 = w[0].equity.try_into().unwrap_or(1.0);
                let curr: f64 = w[1].equity.try_into().unwrap_or(1.0);
                (curr - prev) / prev
            })
            .collect();

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 {
            return 0.0;
        }

        (mean * 252.0_f64.sqrt()) / std_dev
    }

    pub fn summary(&self) -> String {
        format!(
            "{} on {} ({} to {})\n\
             ----------------------------------------\n\
             Total Return: {:.2}%\n\
             Final Equity: ${:.2}\n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             Avg Trade: ${:.2}\n\
             Avg Winner: ${:.2}\n\
             Avg Loser: ${:.2}\n\
             \n\
             Fills: {}\n\
             Total Commission: ${:.2}",
            self.strategy,
            self.ticker,
            self.start_date,
            self.end_date,
            self.total_return_pct,
            self.final_equity,
            self.max_drawdown_pct,
            self.sharpe_ratio(),
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate() * 100.0,
            self.profit_factor(),
            self.avg_trade_pnl(),
            self.avg_winner(),
            self.avg_loser(),
            self.fills,
            self.total_commission,
        )
    }
}

/// The replay engine.
pub struct BacktestEngine {
    config: BacktestConfig,
    broker: PaperBroker,
    equity_curve: Vec<EquityPoint>,
    peak_equity: Decimal,
    max_drawdown: Decimal,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        let broker = Self::fresh_broker(&config);
        let peak_equity = config.initial_cash;
        Self {
            config,
            broker,
            equity_curve: Vec::new(),
            peak_equity,
            max_drawdown: Decimal::ZERO,
        }
    }

    fn fresh_broker(config: &BacktestConfig) -> PaperBroker {
        PaperBroker::new(
            config.initial_cash,
            config.slippage.clone(),
            config.commission.clone(),
        )
    }

    /// Load `ticker` snapshots for the range and replay them.
    pub fn load_and_run(
        &mut self,
        loader: &DataLoader,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, LoaderError> {
        let snapshots = loader.load_snapshots(ticker, start_date, end_date)?;
        Ok(self.run(strategy, &snapshots))
    }

    /// Replay `snapshots` (chronological) through `strategy`.
    pub fn run(&mut self, strategy: &mut dyn Strategy, snapshots: &[OptionsSnapshot]) -> BacktestResult {
        self.broker = Self::fresh_broker(&self.config);
        self.equity_curve.clear();
        self.peak_equity = self.config.initial_cash;
        self.max_drawdown = Decimal::ZERO;

        let filter = strategy.chain_filter();
        info!(
            strategy = strategy.name(),
            snapshots = snapshots.len(),
            "Starting replay"
        );

        let mut prev_date: Option<NaiveDate> = None;
        for snapshot in snapshots {
            let date = snapshot.date();
            if let Some(prev) = prev_date.filter(|p| *p != date) {
                strategy.on_end_of_day(prev, &mut self.broker);
                self.record_equity(prev);
            }

            self.broker.settle_expired(date);
            self.broker.update(snapshot);

            let slice = filter.apply(snapshot);
            strategy.on_data(&slice, &mut self.broker);
            prev_date = Some(date);
        }

        if let Some(last) = prev_date {
            strategy.on_end_of_day(last, &mut self.broker);
        }
        let report = strategy.on_end(&mut self.broker);
        for line in report.render().lines() {
            info!("{line}");
        }

        self.broker.close_all(ExitReason::EndOfPeriod);
        if let Some(last) = prev_date {
            self.record_equity(last);
        }

        let ticker = snapshots
            .first()
            .map(|s| s.ticker.clone())
            .unwrap_or_default();
        let start_date = snapshots.first().map(|s| s.date()).unwrap_or_default();
        let end_date = prev_date.unwrap_or(start_date);
        self.build_result(strategy.name(), ticker, start_date, end_date, report)
    }

    /// Append (or replace, for the same date) the day's equity point.
    fn record_equity(&mut self, date: NaiveDate) {
        let equity = self.broker.portfolio_value();
        if self.equity_curve.last().map(|p| p.date) == Some(date) {
            self.equity_curve.pop();
        }
        let prev_equity = self
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.config.initial_cash);

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = self.peak_equity - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }

        self.equity_curve.push(EquityPoint {
            date,
            equity,
            cash: self.broker.cash(),
            positions_value: self.broker.positions_value(),
            open_positions: self.broker.holdings().len(),
            daily_pnl: equity - prev_equity,
        });
    }

    fn build_result(
        &self,
        strategy: &str,
        ticker: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        report: StrategyReport,
    ) -> BacktestResult {
        let final_equity = self.broker.portfolio_value();
        let initial: f64 = self.config.initial_cash.try_into().unwrap_or(1.0);
        let final_eq: f64 = final_equity.try_into().unwrap_or(1.0);
        let total_return_pct = if initial != 0.0 {
            (final_eq - initial) / initial * 100.0
        } else {
            0.0
        };

        let peak: f64 = self.peak_equity.try_into().unwrap_or(1.0);
        let max_dd: f64 = self.max_drawdown.try_into().unwrap_or(0.0);
        let max_drawdown_pct = if peak > 0.0 { max_dd / peak * 100.0 } else { 0.0 };

        let trades = self.broker.trades().to_vec();
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        let losing_trades = trades.len() - winning_trades;
        let total_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();
        let gross_profit: Decimal = trades.iter().filter(|t| t.is_winner()).map(|t| t.pnl).sum();
        let gross_loss: Decimal = trades.iter().filter(|t| !t.is_winner()).map(|t| t.pnl).sum();

        BacktestResult {
            config: self.config.clone(),
            strategy: strategy.to_string(),
            ticker,
            start_date,
            end_date,
            total_trades: trades.len(),
            trades,
            equity_curve: self.equity_curve.clone(),
            final_equity,
            total_return_pct,
            trading_days: self.equity_curve.len(),
            peak_equity: self.peak_equity,
            max_drawdown: self.max_drawdown,
            max_drawdown_pct,
            winning_trades,
            losing_trades,
            total_pnl,
            gross_profit,
            gross_loss,
            total_commission: self.broker.total_commission(),
            fills: self.broker.fill_count(),
            report,
        }
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::broker::tests::quote;
    use crate::data::OptionType;
    use crate::selection::ChainFilter;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn snapshot(d: u32, hour: u32, mid: Decimal) -> OptionsSnapshot {
        let time = day(d).and_hms_opt(hour, 0, 0).unwrap();
        let mut snap = OptionsSnapshot::new(time, "SPY", Some(dec!(100)));
        snap.add_quote(quote(time, day(31), dec!(100), OptionType::Call, mid, mid));
        snap
    }

    /// Buys one call on the first bar, never sells.
    #[derive(Default)]
    struct BuyOnce {
        bought: bool,
        eod_dates: Vec<NaiveDate>,
        bars: usize,
    }

    impl Strategy for BuyOnce {
        fn name(&self) -> &str {
            "buy_once"
        }

        fn chain_filter(&self) -> ChainFilter {
            ChainFilter::new(5, 5, 0, 60)
        }

        fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
            self.bars += 1;
            if self.bought {
                return;
            }
            if let Some(q) = slice.calls().next() {
                self.bought = broker.buy(q, 1).is_ok();
            }
        }

        fn on_end_of_day(&mut self, date: NaiveDate, _broker: &mut dyn Broker) {
            self.eod_dates.push(date);
        }

        fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport {
            let mut report = StrategyReport::new("buy once");
            report.push(format!("open contracts: {}", broker.open_contracts()));
            report
        }
    }

    #[test]
    fn test_default_config() {
        let config = BacktestConfig::default();
        assert_eq!(config.initial_cash, dec!(100_000));
        assert_eq!(config.commission.per_contract, dec!(1));
    }

    #[test]
    fn test_replay_marks_and_closes_at_end() {
        let config = BacktestConfig {
            initial_cash: dec!(10_000),
            slippage: SlippageModel::zero(),
            commission: CommissionModel::zero(),
        };
        let snapshots = vec![
            snapshot(2, 10, dec!(1.00)),
            snapshot(2, 15, dec!(1.20)),
            snapshot(3, 10, dec!(0.80)),
            snapshot(4, 10, dec!(1.50)),
        ];

        let mut strategy = BuyOnce::default();
        let mut engine = BacktestEngine::new(config);
        let result = engine.run(&mut strategy, &snapshots);

        assert_eq!(strategy.bars, 4);
        assert_eq!(strategy.eod_dates, vec![day(2), day(3), day(4)]);
        assert_eq!(result.report.lines, vec!["open contracts: 1".to_string()]);

        assert_eq!(result.total_trades, 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfPeriod);
        assert_eq!(result.total_pnl, dec!(50));
        assert_eq!(result.final_equity, dec!(10_050));

        // one point per day
        let equity: Vec<Decimal> = result.equity_curve.iter().map(|p| p.equity).collect();
        assert_eq!(equity, vec![dec!(10_020), dec!(9_980), dec!(10_050)]);
        assert_eq!(result.max_drawdown, dec!(40));
        assert_eq!(result.start_date, day(2));
        assert_eq!(result.end_date, day(4));
    }

    /// Buys a same-day call on the first bar and flattens at the end of each day.
    #[derive(Default)]
    struct ZeroDte {
        bought: bool,
    }

    impl Strategy for ZeroDte {
        fn name(&self) -> &str {
            "zero_dte"
        }

        fn chain_filter(&self) -> ChainFilter {
            ChainFilter::new(5, 5, 0, 60)
        }

        fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
            if self.bought {
                return;
            }
            let today = slice.date();
            if let Some(q) = slice.calls().find(|q| q.expiration == today) {
                self.bought = broker.buy(q, 1).is_ok();
            }
        }

        fn on_end_of_day(&mut self, _date: NaiveDate, broker: &mut dyn Broker) {
            broker.liquidate_all();
        }

        fn on_end(&mut self, _broker: &mut dyn Broker) -> StrategyReport {
            StrategyReport::default()
        }
    }

    #[test]
    fn test_same_day_expiry_flattened_before_settlement() {
        let config = BacktestConfig {
            initial_cash: dec!(10_000),
            slippage: SlippageModel::zero(),
            commission: CommissionModel::zero(),
        };
        let same_day = |hour: u32, mid: Decimal| {
            let time = day(2).and_hms_opt(hour, 0, 0).unwrap();
            let mut snap = OptionsSnapshot::new(time, "SPY", Some(dec!(100)));
            snap.add_quote(quote(time, day(2), dec!(100), OptionType::Call, mid, mid));
            snap
        };
        // the 0DTE call is gone the next morning; it would settle at 0 intrinsic
        let snapshots = vec![
            same_day(10, dec!(1.00)),
            same_day(15, dec!(1.20)),
            snapshot(3, 10, dec!(2.00)),
        ];

        let mut strategy = ZeroDte::default();
        let result = BacktestEngine::new(config).run(&mut strategy, &snapshots);

        assert_eq!(result.total_trades, 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Strategy);
        assert_eq!(trade.exit_price, dec!(1.20));
        assert_eq!(trade.pnl, dec!(20));
        assert_eq!(result.final_equity, dec!(10_020));
    }

    #[test]
    fn test_empty_replay() {
        let mut strategy = BuyOnce::default();
        let result = BacktestEngine::new(BacktestConfig::default()).run(&mut strategy, &[]);
        assert_eq!(result.total_trades, 0);
        assert!(result.equity_curve.is_empty());
        assert_eq!(result.final_equity, dec!(100_000));
        assert_eq!(result.total_return_pct, 0.0);
    }

    #[test]
    fn test_result_ratios() {
        let mut strategy = BuyOnce::default();
        let mut result = BacktestEngine::new(BacktestConfig::default()).run(&mut strategy, &[]);
        result.total_trades = 100;
        result.winning_trades = 70;
        result.losing_trades = 30;
        result.total_pnl = dec!(10_000);
        result.gross_profit = dec!(15_000);
        result.gross_loss = dec!(-5_000);

        assert_eq!(result.win_rate(), 0.7);
        assert_eq!(result.profit_factor(), 3.0);
        assert_eq!(result.avg_trade_pnl(), dec!(100));
        assert!(result.summary().contains("Win Rate: 70.0%"));
    }
}
