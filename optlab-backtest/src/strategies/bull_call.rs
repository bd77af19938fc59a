//! Low-delta bull call spread, entered on Fridays.
//!
//! Buys a ~21 delta call and sells a ~7 delta call with the same expiry and a
//! higher strike. Spreads are held to expiration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::Broker;
use crate::data::{ContractId, OptionQuote, OptionsSnapshot};
use crate::selection::{ChainFilter, DeltaBand};

use super::{is_friday, Strategy, StrategyReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BullCallSpreadConfig {
    pub long_band: DeltaBand,
    pub short_band: DeltaBand,
    pub contracts: i32,
    pub filter: ChainFilter,
}

impl Default for BullCallSpreadConfig {
    fn default() -> Self {
        Self {
            long_band: DeltaBand::inclusive(0.17, 0.25, 0.21),
            short_band: DeltaBand::inclusive(0.05, 0.09, 0.07),
            contracts: 1,
            filter: ChainFilter::new(60, 60, 34, 43),
        }
    }
}

/// An open spread.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadPosition {
    pub long: ContractId,
    pub short: ContractId,
    pub expiry: NaiveDate,
    pub entry_date: NaiveDate,
}

pub struct BullCallSpread {
    config: BullCallSpreadConfig,
    open_positions: Vec<SpreadPosition>,
    spreads_opened: usize,
    spreads_expired: usize,
}

impl BullCallSpread {
    pub fn new(config: BullCallSpreadConfig) -> Self {
        Self {
            config,
            open_positions: Vec::new(),
            spreads_opened: 0,
            spreads_expired: 0,
        }
    }

    pub fn open_positions(&self) -> &[SpreadPosition] {
        &self.open_positions
    }

    fn check_exits(&mut self, today: NaiveDate, broker: &mut dyn Broker) {
        let (expiring, open): (Vec<SpreadPosition>, Vec<SpreadPosition>) = self
            .open_positions
            .drain(..)
            .partition(|p| (p.expiry - today).num_days() <= 0);

        for position in &expiring {
            broker.liquidate(&position.long);
            broker.liquidate(&position.short);
            debug!(expiry = %position.expiry, "Closed expiring spread");
        }
        self.spreads_expired += expiring.len();
        self.open_positions = open;
    }

    /// First (long, short) pair: longs by distance to the long target, then
    /// the closest short above each long's strike on the same expiry.
    fn select_pair<'a>(&self, calls: &[&'a OptionQuote]) -> Option<(&'a OptionQuote, &'a OptionQuote)> {
        let longs = self.config.long_band.candidates(calls.iter().copied());
        longs.into_iter().find_map(|long| {
            let shorts = self.config.short_band.candidates(
                calls
                    .iter()
                    .copied()
                    .filter(|c| c.expiration == long.expiration && c.strike > long.strike),
            );
            shorts.first().map(|short| (long, *short))
        })
    }

    fn enter(&mut self, today: NaiveDate, long: &OptionQuote, short: &OptionQuote, broker: &mut dyn Broker) {
        let contracts = self.config.contracts;
        if let Err(e) = broker.buy(long, contracts) {
            warn!(contract = %long.contract_id(), error = %e, "Long leg rejected");
            return;
        }
        if let Err(e) = broker.sell(short, contracts) {
            warn!(contract = %short.contract_id(), error = %e, "Short leg rejected; unwinding long");
            broker.liquidate(&long.contract_id());
            return;
        }

        self.open_positions.push(SpreadPosition {
            long: long.contract_id(),
            short: short.contract_id(),
            expiry: long.expiration,
            entry_date: today,
        });
        self.spreads_opened += 1;

        let price = broker.underlying_price().unwrap_or(long.underlying_price);
        info!(
            "{} | Price: {:.2} | Buy {}C (Δ={:.2}) / Sell {}C (Δ={:.2}) exp {}",
            today,
            price,
            long.strike.normalize(),
            long.greeks.delta,
            short.strike.normalize(),
            short.greeks.delta,
            long.expiration
        );
    }
}

impl Default for BullCallSpread {
    fn default() -> Self {
        Self::new(BullCallSpreadConfig::default())
    }
}

impl Strategy for BullCallSpread {
    fn name(&self) -> &str {
        "bull_call_spread"
    }

    fn chain_filter(&self) -> ChainFilter {
        self.config.filter.clone()
    }

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        let today = slice.date();
        if !is_friday(today) {
            return;
        }

        self.check_exits(today, broker);

        if self.open_positions.iter().any(|p| p.entry_date == today) {
            return;
        }

        let calls: Vec<&OptionQuote> = slice.calls().filter(|c| c.expiration > today).collect();
        if calls.is_empty() {
            return;
        }

        match self.select_pair(&calls) {
            Some((long, short)) => self.enter(today, long, short, broker),
            None => debug!(%today, "No spread in the delta bands"),
        }
    }

    fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport {
        let mut report = StrategyReport::new("=== Bull Call Spread Summary ===");
        report.push(format!("Spreads opened: {}", self.spreads_opened));
        report.push(format!("Spreads held to expiry: {}", self.spreads_expired));
        report.push(format!("Still open: {}", self.open_positions.len()));
        report.push(format!("Portfolio value: {:.2}", broker.portfolio_value()));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::PaperBroker;
    use crate::data::OptionType;
    use crate::strategies::test_support::{at, day, option};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn add_call(snap: &mut OptionsSnapshot, exp: NaiveDate, strike: i64, delta: f64) {
        let mid = Decimal::from(450 - strike) / dec!(10);
        let q = option(snap.timestamp, exp, Decimal::from(strike), OptionType::Call, mid, delta, dec!(400));
        snap.add_quote(q);
    }

    fn friday_slice() -> OptionsSnapshot {
        let exp = day(2024, 2, 16);
        let mut snap = OptionsSnapshot::new(at(day(2024, 1, 5), 16, 0), "SPY", Some(dec!(400)));
        for (strike, delta) in [(405, 0.30), (410, 0.24), (415, 0.21), (420, 0.12), (425, 0.08), (430, 0.05)] {
            add_call(&mut snap, exp, strike, delta);
        }
        snap
    }

    fn step(strategy: &mut BullCallSpread, broker: &mut PaperBroker, snap: &OptionsSnapshot) {
        broker.update(snap);
        strategy.on_data(snap, broker);
    }

    #[test]
    fn test_enters_closest_pair_on_friday() {
        let mut strategy = BullCallSpread::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let snap = friday_slice();
        step(&mut strategy, &mut broker, &snap);

        let position = &strategy.open_positions()[0];
        assert_eq!(position.long.strike, dec!(415));
        assert_eq!(position.short.strike, dec!(425));
        assert_eq!(position.expiry, day(2024, 2, 16));
        assert_eq!(broker.quantity(&position.long), 1);
        assert_eq!(broker.quantity(&position.short), -1);

        // one spread per Friday
        step(&mut strategy, &mut broker, &snap);
        assert_eq!(strategy.open_positions().len(), 1);
    }

    #[test]
    fn test_skips_non_fridays() {
        let mut strategy = BullCallSpread::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let mut snap = friday_slice();
        snap.timestamp = at(day(2024, 1, 4), 16, 0);
        step(&mut strategy, &mut broker, &snap);
        assert!(strategy.open_positions().is_empty());
        assert!(broker.holdings().is_empty());
    }

    #[test]
    fn test_falls_back_to_next_long_with_a_short() {
        let today = day(2024, 1, 5);
        let near = day(2024, 2, 9);
        let far = day(2024, 2, 16);
        let mut snap = OptionsSnapshot::new(at(today, 16, 0), "SPY", Some(dec!(400)));
        // best long on `far` only has band shorts below its strike
        add_call(&mut snap, far, 405, 0.07);
        add_call(&mut snap, far, 420, 0.21);
        add_call(&mut snap, near, 410, 0.24);
        add_call(&mut snap, near, 420, 0.06);

        let mut strategy = BullCallSpread::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &snap);

        let position = &strategy.open_positions()[0];
        assert_eq!(position.long.strike, dec!(410));
        assert_eq!(position.short.strike, dec!(420));
        assert_eq!(position.expiry, near);
        assert!(position.short.strike > position.long.strike);
    }

    #[test]
    fn test_liquidates_on_expiry_friday() {
        let mut strategy = BullCallSpread::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &friday_slice());
        assert_eq!(broker.holdings().len(), 2);

        // a Friday before expiry keeps the spread
        let mid = OptionsSnapshot::new(at(day(2024, 2, 9), 16, 0), "SPY", Some(dec!(410)));
        step(&mut strategy, &mut broker, &mid);
        assert_eq!(strategy.open_positions().len(), 1);

        let expiry = OptionsSnapshot::new(at(day(2024, 2, 16), 16, 0), "SPY", Some(dec!(420)));
        step(&mut strategy, &mut broker, &expiry);
        assert!(strategy.open_positions().is_empty());
        assert!(broker.holdings().is_empty());
        assert_eq!(broker.trades().len(), 2);

        let report = strategy.on_end(&mut broker);
        assert_eq!(report.lines[1], "Spreads held to expiry: 1");
    }
}
