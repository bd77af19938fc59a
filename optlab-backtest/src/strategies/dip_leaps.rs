//! Buy-the-dip LEAP calls.
//!
//! After a daily drop of 1% or more the strategy buys one ~0.70 delta call
//! about a year out, keeping LEAP exposure within 10% of portfolio value.
//! Positions are sold at 1.5x the entry price.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::{Broker, CONTRACT_MULTIPLIER};
use crate::data::{ContractId, OptionsSnapshot};
use crate::selection::{ChainFilter, DeltaBand};

use super::leaps::profit_pct;
use super::{Strategy, StrategyReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DipLeapConfig {
    pub contracts: i32,
    pub band: DeltaBand,
    /// Close-to-close return that counts as a dip.
    pub dip_threshold: Decimal,
    /// Share of portfolio value LEAPs may occupy.
    pub budget_fraction: Decimal,
    pub profit_multiple: Decimal,
    pub filter: ChainFilter,
}

impl Default for DipLeapConfig {
    fn default() -> Self {
        Self {
            contracts: 1,
            band: DeltaBand::exclusive(0.60, 0.80, 0.70),
            dip_threshold: Decimal::new(-1, 2),
            budget_fraction: Decimal::new(10, 2),
            profit_multiple: Decimal::new(15, 1),
            filter: ChainFilter::new(10, 10, 360, 370),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DipPosition {
    contract: ContractId,
    entry_price: Decimal,
    entry_time: NaiveDateTime,
}

/// A position closed at the profit target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DipTrade {
    pub contract: ContractId,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub profit_pct: Decimal,
}

pub struct DipLeap {
    config: DipLeapConfig,
    last_close: Option<Decimal>,
    positions: Vec<DipPosition>,
    trade_log: Vec<DipTrade>,
    out_of_money: HashSet<ContractId>,
}

impl DipLeap {
    pub fn new(config: DipLeapConfig) -> Self {
        Self {
            config,
            last_close: None,
            positions: Vec::new(),
            trade_log: Vec::new(),
            out_of_money: HashSet::new(),
        }
    }

    pub fn trade_log(&self) -> &[DipTrade] {
        &self.trade_log
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }

    fn is_dip(&self, close: Decimal) -> bool {
        match self.last_close {
            Some(last) if !last.is_zero() => (close - last) / last <= self.config.dip_threshold,
            _ => false,
        }
    }

    fn try_open(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        let margin_limit = broker.portfolio_value() * self.config.budget_fraction;
        let used_margin: Decimal = self
            .positions
            .iter()
            .filter_map(|p| broker.mark_price(&p.contract))
            .map(|p| p * CONTRACT_MULTIPLIER)
            .sum();
        let available_margin = margin_limit - used_margin;
        let contracts = self.config.contracts;

        let candidate = self
            .config
            .band
            .candidates(slice.quotes())
            .into_iter()
            .find(|c| c.ask * CONTRACT_MULTIPLIER * Decimal::from(contracts) <= available_margin);
        let Some(c) = candidate else {
            debug!(time = %slice.timestamp, %available_margin, "Dip with no affordable LEAP");
            return;
        };

        if let Err(e) = broker.buy(c, contracts) {
            warn!(contract = %c.contract_id(), error = %e, "LEAP order rejected");
            return;
        }
        info!(
            "Bought LEAP {} at {:.2}, delta {:.2}",
            c.contract_id(),
            c.ask,
            c.greeks.delta
        );
        self.positions.push(DipPosition {
            contract: c.contract_id(),
            entry_price: c.ask,
            entry_time: slice.timestamp,
        });
    }

    /// Sell winners in entry order. The scan stops at the first position
    /// trading under its entry, which is flagged once.
    fn check_exits(&mut self, now: NaiveDateTime, broker: &mut dyn Broker) {
        let mut closed = Vec::new();
        for (i, position) in self.positions.iter().enumerate() {
            let current = match broker.mark_price(&position.contract) {
                Some(price) if broker.is_invested(&position.contract) => price,
                _ => continue,
            };
            let entry = position.entry_price;

            if current >= self.config.profit_multiple * entry {
                broker.liquidate(&position.contract);
                let trade = DipTrade {
                    contract: position.contract.clone(),
                    entry_time: position.entry_time,
                    exit_time: now,
                    entry_price: entry,
                    exit_price: current,
                    profit_pct: profit_pct(entry, current),
                };
                info!(
                    "Sold LEAP {} at {:.2} ({}%)",
                    trade.contract, current, trade.profit_pct
                );
                self.trade_log.push(trade);
                closed.push(i);
            } else if current < entry {
                if self.out_of_money.insert(position.contract.clone()) {
                    info!(
                        "{} is out of the money at {:.2} < {:.2}",
                        position.contract, current, entry
                    );
                }
                break;
            }
        }

        for i in closed.into_iter().rev() {
            let position = self.positions.remove(i);
            self.out_of_money.remove(&position.contract);
        }
    }
}

impl Default for DipLeap {
    fn default() -> Self {
        Self::new(DipLeapConfig::default())
    }
}

impl Strategy for DipLeap {
    fn name(&self) -> &str {
        "dip_leaps"
    }

    fn chain_filter(&self) -> ChainFilter {
        self.config.filter.clone()
    }

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        let Some(close) = slice.underlying_price else {
            return;
        };

        if self.is_dip(close) {
            self.try_open(slice, broker);
        }
        self.last_close = Some(close);

        self.check_exits(slice.timestamp, broker);
    }

    fn on_end(&mut self, _broker: &mut dyn Broker) -> StrategyReport {
        if self.trade_log.is_empty() {
            let mut report = StrategyReport::default();
            report.push("No trades closed profitably. No CSV to display.");
            return report;
        }

        let mut report = StrategyReport::new("TRADE SUMMARY");
        report.push("Entry Date | Exit Date | Entry Price | Exit Price | Profit %");
        report.push("-".repeat(60));
        for trade in &self.trade_log {
            report.push(format!(
                "{} | {} | {:.2} | {:.2} | {:.2}%",
                trade.entry_time.format("%Y-%m-%d"),
                trade.exit_time.format("%Y-%m-%d"),
                trade.entry_price,
                trade.exit_price,
                trade.profit_pct
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::PaperBroker;
    use crate::data::OptionType;
    use crate::strategies::test_support::{at, day, option};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    /// One-year calls: (strike, mid, delta).
    fn slice(date: NaiveDate, close: Decimal, legs: &[(i64, Decimal, f64)]) -> OptionsSnapshot {
        let time = at(date, 16, 0);
        let exp = day(2025, 1, 10);
        let mut snap = OptionsSnapshot::new(time, "QQQ", Some(close));
        for (strike, mid, delta) in legs {
            snap.add_quote(option(time, exp, Decimal::from(*strike), OptionType::Call, *mid, *delta, close));
        }
        snap
    }

    fn step(strategy: &mut DipLeap, broker: &mut PaperBroker, snap: &OptionsSnapshot) {
        broker.update(snap);
        strategy.on_data(snap, broker);
    }

    #[test]
    fn test_buys_only_after_a_dip() {
        let mut strategy = DipLeap::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let legs = [(380, dec!(39.95), 0.70)];

        step(&mut strategy, &mut broker, &slice(day(2024, 1, 2), dec!(400), &legs));
        // -0.5%
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 3), dec!(398), &legs));
        assert_eq!(strategy.open_positions(), 0);

        // -1.0% from 398
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 4), dec!(394.02), &legs));
        assert_eq!(strategy.open_positions(), 1);
        assert_eq!(broker.open_contracts(), 1);
    }

    #[test]
    fn test_budget_skips_expensive_contracts() {
        let mut strategy = DipLeap::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        // 10% budget = 10,000: the 0.70 call at 120 does not fit
        let legs = [(300, dec!(119.95), 0.70), (420, dec!(29.95), 0.62)];

        step(&mut strategy, &mut broker, &slice(day(2024, 1, 2), dec!(400), &legs));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 3), dec!(390), &legs));

        let holdings = broker.holdings();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].contract.strike, dec!(420));
    }

    /// Opens the 400 call at 20.00, then the 410 call at 10.00.
    fn two_positions(strategy: &mut DipLeap, broker: &mut PaperBroker) {
        step(strategy, broker, &slice(day(2024, 1, 2), dec!(400), &[]));
        step(strategy, broker, &slice(day(2024, 1, 3), dec!(390), &[(400, dec!(19.95), 0.70)]));
        step(strategy, broker, &slice(day(2024, 1, 4), dec!(380), &[(410, dec!(9.95), 0.70)]));
        assert_eq!(strategy.open_positions(), 2);
    }

    #[test]
    fn test_underwater_position_stops_exit_scan() {
        let mut strategy = DipLeap::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        two_positions(&mut strategy, &mut broker);

        // first position under water, second at 1.5x its entry of 10.00
        let legs = [(400, dec!(15), 0.65), (410, dec!(15), 0.66)];
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), dec!(381), &legs));

        assert!(strategy.trade_log().is_empty());
        assert_eq!(strategy.open_positions(), 2);
        assert_eq!(broker.open_contracts(), 2);
        assert_eq!(strategy.out_of_money.len(), 1);

        // flagged once, still blocks the scan
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 8), dec!(382), &legs));
        assert!(strategy.trade_log().is_empty());
        assert_eq!(strategy.out_of_money.len(), 1);
    }

    #[test]
    fn test_winner_ahead_of_loser_is_sold() {
        let mut strategy = DipLeap::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        two_positions(&mut strategy, &mut broker);

        // first position at 1.5x its entry of 20.00, second under water
        let legs = [(400, dec!(30), 0.75), (410, dec!(9), 0.66)];
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 5), dec!(381), &legs));

        assert_eq!(strategy.trade_log().len(), 1);
        let trade = &strategy.trade_log()[0];
        assert_eq!(trade.contract.strike, dec!(400));
        assert_eq!(trade.profit_pct, dec!(50));
        assert_eq!(strategy.open_positions(), 1);
        assert_eq!(strategy.out_of_money.len(), 1);

        let report = strategy.on_end(&mut broker);
        assert_eq!(report.title, "TRADE SUMMARY");
        assert_eq!(report.lines[2], "2024-01-03 | 2024-01-05 | 20.00 | 30.00 | 50.00%");
    }

    #[test]
    fn test_empty_summary() {
        let mut strategy = DipLeap::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let report = strategy.on_end(&mut broker);
        assert_eq!(report.lines, vec!["No trades closed profitably. No CSV to display.".to_string()]);
    }
}
