//! LEAP call accumulation.
//!
//! Every other Friday (at most) the strategy:
//! 1. Closes LEAPs that reached 1.5x their entry price or are within 30 DTE
//! 2. Buys a ~0.70 delta call about a year out if it fits in 99% of equity
//!
//! Every closed trade is kept for the end-of-run summary table.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::{Broker, CONTRACT_MULTIPLIER};
use crate::data::{ContractId, OptionsSnapshot};
use crate::selection::{ChainFilter, DeltaBand};

use super::{is_friday, Strategy, StrategyReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeapAccumulationConfig {
    pub contracts: i32,
    pub band: DeltaBand,
    pub min_dte: i64,
    pub max_dte: i64,
    /// Exit once the mark reaches this multiple of the entry price.
    pub profit_multiple: Decimal,
    /// Exit at or below this many days to expiry.
    pub exit_dte: i64,
    /// Share of portfolio value that may be committed.
    pub margin_fraction: Decimal,
    pub min_days_between: i64,
    pub open_time: NaiveTime,
    pub filter: ChainFilter,
}

impl Default for LeapAccumulationConfig {
    fn default() -> Self {
        Self {
            contracts: 10,
            band: DeltaBand::exclusive(0.60, 0.80, 0.70),
            min_dte: 360,
            max_dte: 391,
            profit_multiple: Decimal::new(15, 1),
            exit_dte: 30,
            margin_fraction: Decimal::new(99, 2),
            min_days_between: 14,
            open_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            filter: ChainFilter::new(10, 10, 360, 391),
        }
    }
}

/// `(current - entry) / entry` in percent, 2 decimals; 0 without a valid entry.
pub fn profit_pct(entry: Decimal, current: Decimal) -> Decimal {
    if entry <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((current - entry) / entry * Decimal::ONE_HUNDRED).round_dp(2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeapTrade {
    pub number: usize,
    pub contract: ContractId,
    /// Ask at entry.
    pub entry_price: Decimal,
    pub entry_time: NaiveDateTime,
    pub delta: f64,
    pub contracts: i32,
    pub equity_at_entry: Decimal,
    pub free_margin_at_entry: Decimal,
    pub open_contracts_at_entry: i32,
    pub exit_price: Option<Decimal>,
    pub exit_date: Option<NaiveDate>,
    pub profit_pct: Option<Decimal>,
}

impl LeapTrade {
    fn close(&mut self, exit_price: Decimal, exit_date: NaiveDate) {
        self.exit_price = Some(exit_price);
        self.exit_date = Some(exit_date);
        self.profit_pct = Some(profit_pct(self.entry_price, exit_price));
    }

    fn summary_row(&self) -> String {
        format!(
            "{} | {} | {} | {} | {:.0} | {:.2} | {:.2} | {:.2} | {}% | ${:.2} | {} | ${:.2}",
            self.number,
            self.entry_time.format("%Y-%m-%d"),
            self.exit_date.map(|d| d.to_string()).unwrap_or_default(),
            self.contract.expiration,
            self.contract.strike,
            self.entry_price,
            self.exit_price.unwrap_or_default(),
            self.delta,
            self.profit_pct.map(|p| p.to_string()).unwrap_or_default(),
            self.equity_at_entry,
            self.open_contracts_at_entry,
            self.free_margin_at_entry,
        )
    }
}

pub struct LeapAccumulation {
    config: LeapAccumulationConfig,
    ticker: String,
    open_trades: Vec<LeapTrade>,
    trade_log: Vec<LeapTrade>,
    trade_counter: usize,
    last_trade_date: Option<NaiveDate>,
}

impl LeapAccumulation {
    pub fn new(config: LeapAccumulationConfig) -> Self {
        Self {
            config,
            ticker: String::new(),
            open_trades: Vec::new(),
            trade_log: Vec::new(),
            trade_counter: 0,
            last_trade_date: None,
        }
    }

    pub fn open_trades(&self) -> &[LeapTrade] {
        &self.open_trades
    }

    pub fn trade_log(&self) -> &[LeapTrade] {
        &self.trade_log
    }

    fn check_exits(&mut self, today: NaiveDate, broker: &mut dyn Broker) {
        let mut i = 0;
        while i < self.open_trades.len() {
            let contract = &self.open_trades[i].contract;
            let current = match broker.mark_price(contract) {
                Some(price) if broker.is_invested(contract) => price,
                _ => {
                    i += 1;
                    continue;
                }
            };
            let entry = self.open_trades[i].entry_price;
            let dte = contract.days_to_expiry(today);

            if current >= self.config.profit_multiple * entry || dte <= self.config.exit_dte {
                let mut trade = self.open_trades.remove(i);
                broker.liquidate(&trade.contract);
                trade.close(current, today);
                info!(
                    "{} Trade#{} Closed {} at ${:.2} ({}%), {} DTE",
                    today,
                    trade.number,
                    trade.contract,
                    current,
                    trade.profit_pct.unwrap_or_default(),
                    dte
                );
                self.trade_log.push(trade);
            } else {
                i += 1;
            }
        }
    }

    fn try_open(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        let today = slice.date();
        let margin_limit = broker.portfolio_value() * self.config.margin_fraction;
        let used_margin: Decimal = self
            .open_trades
            .iter()
            .filter_map(|t| broker.mark_price(&t.contract))
            .map(|p| p * CONTRACT_MULTIPLIER)
            .sum();
        let available_margin = margin_limit - used_margin;
        let open_contracts_now = broker.open_contracts();
        let contracts = self.config.contracts;

        let candidate = self.config.band.candidates(slice.quotes()).into_iter().find(|c| {
            let dte = c.contract_id().days_to_expiry(today);
            let total_cost = c.ask * CONTRACT_MULTIPLIER * Decimal::from(contracts);
            (self.config.min_dte..=self.config.max_dte).contains(&dte) && total_cost <= available_margin
        });
        let Some(c) = candidate else {
            debug!(%today, %available_margin, "No LEAP within budget");
            return;
        };

        if let Err(e) = broker.buy(c, contracts) {
            warn!(contract = %c.contract_id(), error = %e, "LEAP order rejected");
            return;
        }

        self.trade_counter += 1;
        let equity_now = broker.portfolio_value();
        info!(
            "{} Trade#{} Bought {}x {} {} Call ${:.0} at ${:.2}, delta {:.2} | Equity: ${:.2}, Contracts: {}, Free Margin: ${:.2}",
            today,
            self.trade_counter,
            contracts,
            c.ticker,
            c.expiration,
            c.strike,
            c.ask,
            c.greeks.delta,
            equity_now,
            open_contracts_now,
            available_margin
        );
        self.open_trades.push(LeapTrade {
            number: self.trade_counter,
            contract: c.contract_id(),
            entry_price: c.ask,
            entry_time: slice.timestamp,
            delta: c.greeks.delta,
            contracts,
            equity_at_entry: equity_now,
            free_margin_at_entry: available_margin,
            open_contracts_at_entry: open_contracts_now,
            exit_price: None,
            exit_date: None,
            profit_pct: None,
        });
    }
}

impl Default for LeapAccumulation {
    fn default() -> Self {
        Self::new(LeapAccumulationConfig::default())
    }
}

impl Strategy for LeapAccumulation {
    fn name(&self) -> &str {
        "leap_accumulation"
    }

    fn chain_filter(&self) -> ChainFilter {
        self.config.filter.clone()
    }

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        if slice.underlying_price.is_none() {
            return;
        }
        if self.ticker.is_empty() {
            self.ticker = slice.ticker.clone();
        }

        let today = slice.date();
        if !is_friday(today) || slice.time() < self.config.open_time {
            return;
        }
        if let Some(last) = self.last_trade_date {
            if (today - last).num_days() < self.config.min_days_between {
                return;
            }
        }

        self.check_exits(today, broker);
        self.try_open(slice, broker);
        self.last_trade_date = Some(today);
    }

    fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport {
        let today = broker.today();
        for mut trade in std::mem::take(&mut self.open_trades) {
            if !broker.is_invested(&trade.contract) {
                continue;
            }
            let current = broker.mark_price(&trade.contract).unwrap_or_default();
            trade.close(current, today);
            broker.liquidate(&trade.contract);
            self.trade_log.push(trade);
        }

        let mut report = StrategyReport::new(format!("TRADE SUMMARY for {}", self.ticker));
        report.push(
            "Trade# | Entry Date | Exit Date | Expiry | Strike | Entry Price | Exit Price | Delta | Profit % | Equity | Open Contracts | Free Margin",
        );
        report.push("-".repeat(140));
        for trade in &self.trade_log {
            report.push(trade.summary_row());
        }
        report.push(format!(
            "FINAL EQUITY: ${:.2}, OPEN CONTRACTS: {}",
            broker.portfolio_value(),
            broker.open_contracts()
        ));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::PaperBroker;
    use crate::data::OptionType;
    use crate::strategies::test_support::{at, day, option};
    use rust_decimal_macros::dec;

    const EXPIRY: (i32, u32, u32) = (2025, 1, 10);

    fn expiry() -> NaiveDate {
        day(EXPIRY.0, EXPIRY.1, EXPIRY.2)
    }

    /// Calls one year out: (strike, mid, delta).
    fn slice(date: NaiveDate, hour: u32, legs: &[(i64, Decimal, f64)]) -> OptionsSnapshot {
        let time = at(date, hour, 0);
        let mut snap = OptionsSnapshot::new(time, "SPY", Some(dec!(470)));
        for (strike, mid, delta) in legs {
            snap.add_quote(option(time, expiry(), Decimal::from(*strike), OptionType::Call, *mid, *delta, dec!(470)));
        }
        snap
    }

    fn chain(mid_70: Decimal) -> Vec<(i64, Decimal, f64)> {
        vec![
            (480, dec!(24.95), 0.65),
            (450, mid_70, 0.70),
            (420, dec!(59.95), 0.79),
            (400, dec!(79.95), 0.85),
        ]
    }

    fn step(strategy: &mut LeapAccumulation, broker: &mut PaperBroker, snap: &OptionsSnapshot) {
        broker.update(snap);
        strategy.on_data(snap, broker);
    }

    #[test]
    fn test_profit_pct() {
        assert_eq!(profit_pct(dec!(40), dec!(60)), dec!(50));
        assert_eq!(profit_pct(dec!(3), dec!(1)), dec!(-66.67));
        assert_eq!(profit_pct(dec!(0), dec!(1)), dec!(0));
    }

    #[test]
    fn test_buys_closest_delta_on_friday_morning() {
        let mut strategy = LeapAccumulation::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let friday = day(2024, 1, 5);

        step(&mut strategy, &mut broker, &slice(friday, 9, &chain(dec!(39.95))));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 4), 11, &chain(dec!(39.95))));
        assert!(strategy.open_trades().is_empty());

        step(&mut strategy, &mut broker, &slice(friday, 10, &chain(dec!(39.95))));
        let trade = &strategy.open_trades()[0];
        assert_eq!(trade.number, 1);
        assert_eq!(trade.contract.strike, dec!(450));
        assert_eq!(trade.entry_price, dec!(40.00));
        assert_eq!(trade.free_margin_at_entry, dec!(99_000));
        assert_eq!(trade.open_contracts_at_entry, 0);
        assert_eq!(broker.open_contracts(), 10);
    }

    #[test]
    fn test_margin_cap_picks_next_candidate() {
        let mut strategy = LeapAccumulation::default();
        let mut broker = PaperBroker::frictionless(dec!(30_000));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), 10, &chain(dec!(39.95))));

        // 0.70 costs 40,000 > 29,700; 0.65 at 25,000 fits
        let trade = &strategy.open_trades()[0];
        assert_eq!(trade.contract.strike, dec!(480));
        assert_eq!(trade.entry_price, dec!(25.00));
    }

    #[test]
    fn test_two_week_spacing_and_profit_exit() {
        let mut strategy = LeapAccumulation::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), 10, &chain(dec!(39.95))));

        // a week later: too soon, even at the profit target
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 12), 10, &chain(dec!(60))));
        assert_eq!(strategy.open_trades().len(), 1);
        assert!(strategy.trade_log().is_empty());

        step(&mut strategy, &mut broker, &slice(day(2024, 1, 19), 10, &chain(dec!(60))));
        let closed = &strategy.trade_log()[0];
        assert_eq!(closed.exit_price, Some(dec!(60)));
        assert_eq!(closed.profit_pct, Some(dec!(50)));
        assert_eq!(closed.exit_date, Some(day(2024, 1, 19)));
        // re-entered the same Friday
        assert_eq!(strategy.open_trades()[0].number, 2);
    }

    #[test]
    fn test_exits_near_expiry() {
        let mut strategy = LeapAccumulation::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), 10, &chain(dec!(39.95))));

        // 28 DTE, well below the profit target
        step(&mut strategy, &mut broker, &slice(day(2024, 12, 13), 10, &chain(dec!(20))));
        let closed = &strategy.trade_log()[0];
        assert_eq!(closed.profit_pct, Some(dec!(-50)));
        assert!(!broker.is_invested(&closed.contract));
    }

    #[test]
    fn test_end_of_run_summary() {
        let mut strategy = LeapAccumulation::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), 10, &chain(dec!(39.95))));

        let report = strategy.on_end(&mut broker);
        assert_eq!(report.title, "TRADE SUMMARY for SPY");
        assert_eq!(report.lines.len(), 4);
        assert!(report.lines[2].starts_with("1 | 2024-01-05 | 2024-01-05 | 2025-01-10 | 450 | 40.00 | 39.95"));
        assert!(report.lines[3].ends_with("OPEN CONTRACTS: 0"));
        assert!(strategy.open_trades().is_empty());
    }
}
