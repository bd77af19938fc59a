//! Overnight calendar call spread.
//!
//! Late each Monday to Thursday the strategy sells an ATM call expiring the
//! next day against a longer-dated ATM call. The short is rolled daily and
//! the long is held until Friday, when everything is closed for the weekend.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::Broker;
use crate::data::{ContractId, OptionQuote, OptionsSnapshot};
use crate::selection::{atm_strike, find_contract, ChainFilter};

use super::{is_friday, Strategy, StrategyReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OvernightCalendarConfig {
    /// Days from today to the short leg's expiry.
    pub short_days: i64,
    /// Days from today to the long leg's expiry.
    pub long_days: i64,
    pub contracts: i32,
    /// Bars before this time of day are ignored.
    pub open_time: NaiveTime,
    pub filter: ChainFilter,
}

impl Default for OvernightCalendarConfig {
    fn default() -> Self {
        Self {
            short_days: 1,
            long_days: 7,
            contracts: 1,
            open_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default(),
            filter: ChainFilter::new(10, 10, 0, 10),
        }
    }
}

pub struct OvernightCalendar {
    config: OvernightCalendarConfig,
    long_call: Option<ContractId>,
    short_call: Option<ContractId>,
    last_trade_date: Option<NaiveDate>,
    short_rolls: usize,
    weekend_closes: usize,
}

impl OvernightCalendar {
    pub fn new(config: OvernightCalendarConfig) -> Self {
        Self {
            config,
            long_call: None,
            short_call: None,
            last_trade_date: None,
            short_rolls: 0,
            weekend_closes: 0,
        }
    }

    fn close_for_weekend(&mut self, broker: &mut dyn Broker) {
        info!(time = %broker.now(), "Closing all positions for weekend");
        for leg in [self.short_call.take(), self.long_call.take()].into_iter().flatten() {
            if broker.is_invested(&leg) {
                broker.liquidate(&leg);
            }
        }
        self.last_trade_date = None;
        self.weekend_closes += 1;
    }

    fn open_legs(&mut self, today: NaiveDate, long: &OptionQuote, short: &OptionQuote, broker: &mut dyn Broker) {
        let contracts = self.config.contracts;

        if self.long_call.is_none() {
            if let Err(e) = broker.buy(long, contracts) {
                warn!(contract = %long.contract_id(), error = %e, "Long call rejected");
                return;
            }
            info!(time = %broker.now(), contract = %long.contract_id(), "Opened long call");
            self.long_call = Some(long.contract_id());
        }

        match broker.sell(short, contracts) {
            Ok(_) => {
                info!(time = %broker.now(), contract = %short.contract_id(), "Opened short call");
                self.short_call = Some(short.contract_id());
                self.last_trade_date = Some(today);
                self.short_rolls += 1;
            }
            Err(e) => warn!(contract = %short.contract_id(), error = %e, "Short call rejected"),
        }
    }
}

impl Default for OvernightCalendar {
    fn default() -> Self {
        Self::new(OvernightCalendarConfig::default())
    }
}

impl Strategy for OvernightCalendar {
    fn name(&self) -> &str {
        "overnight_calendar"
    }

    fn chain_filter(&self) -> ChainFilter {
        self.config.filter.clone()
    }

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        if slice.time() < self.config.open_time {
            return;
        }
        let Some(price) = slice.underlying_price else {
            debug!(time = %slice.timestamp, "No underlying price");
            return;
        };

        let calls: Vec<&OptionQuote> = slice.calls().collect();
        let Some(atm) = atm_strike(calls.iter().copied(), price) else {
            return;
        };

        let today = slice.date();
        if is_friday(today) && (self.short_call.is_some() || self.long_call.is_some()) {
            self.close_for_weekend(broker);
            return;
        }

        if self.last_trade_date == Some(today) {
            return;
        }

        // Monday to Thursday
        if today.weekday().num_days_from_monday() > 3 {
            return;
        }

        if let Some(short) = self.short_call.clone() {
            if broker.is_invested(&short) {
                broker.liquidate(&short);
                info!(time = %broker.now(), contract = %short, "Closed short call");
                self.short_call = None;
            }
        }

        let short_expiry = today + Duration::days(self.config.short_days);
        let long_expiry = today + Duration::days(self.config.long_days);
        let short = find_contract(calls.iter().copied(), atm, short_expiry);
        let long = find_contract(calls.iter().copied(), atm, long_expiry);

        match (short, long) {
            (Some(short), Some(long)) => self.open_legs(today, long, short, broker),
            _ => debug!(%today, %atm, "No calendar pair at the ATM strike"),
        }
    }

    fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport {
        let mut report = StrategyReport::new("=== Overnight Calendar Summary ===");
        report.push(format!("Short calls sold: {}", self.short_rolls));
        report.push(format!("Weekend closes: {}", self.weekend_closes));
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

    fn slice(date: NaiveDate, hour: u32) -> OptionsSnapshot {
        let time = at(date, hour, 0);
        let price = dec!(100.2);
        let mut snap = OptionsSnapshot::new(time, "SPY", Some(price));
        for days in [1, 7] {
            let exp = date + Duration::days(days);
            for strike in [99, 100, 101] {
                let mid = Decimal::from(days) / dec!(2) + dec!(1);
                snap.add_quote(option(time, exp, Decimal::from(strike), OptionType::Call, mid, 0.5, price));
            }
        }
        snap
    }

    fn call(exp: NaiveDate) -> ContractId {
        ContractId::new("SPY", exp, dec!(100), OptionType::Call)
    }

    fn step(strategy: &mut OvernightCalendar, broker: &mut PaperBroker, snap: &OptionsSnapshot) {
        broker.update(snap);
        strategy.on_data(snap, broker);
    }

    #[test]
    fn test_ignores_bars_before_open_time() {
        let mut strategy = OvernightCalendar::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 8), 14));
        assert!(broker.holdings().is_empty());
    }

    #[test]
    fn test_opens_then_rolls_short() {
        let mut strategy = OvernightCalendar::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));
        let monday = day(2024, 1, 8);
        let tuesday = day(2024, 1, 9);

        step(&mut strategy, &mut broker, &slice(monday, 15));
        assert_eq!(broker.quantity(&call(day(2024, 1, 15))), 1);
        assert_eq!(broker.quantity(&call(tuesday)), -1);

        // once per day
        step(&mut strategy, &mut broker, &slice(monday, 16));
        assert_eq!(broker.holdings().len(), 2);

        step(&mut strategy, &mut broker, &slice(tuesday, 15));
        assert_eq!(broker.quantity(&call(tuesday)), 0);
        assert_eq!(broker.quantity(&call(day(2024, 1, 10))), -1);
        // long is kept, not doubled
        assert_eq!(broker.quantity(&call(day(2024, 1, 15))), 1);
        assert_eq!(broker.open_contracts(), 1);
        assert_eq!(strategy.short_rolls, 2);
    }

    #[test]
    fn test_friday_closes_everything() {
        let mut strategy = OvernightCalendar::default();
        let mut broker = PaperBroker::frictionless(dec!(100_000));

        step(&mut strategy, &mut broker, &slice(day(2024, 1, 11), 15));
        assert_eq!(broker.holdings().len(), 2);

        step(&mut strategy, &mut broker, &slice(day(2024, 1, 12), 15));
        assert!(broker.holdings().is_empty());
        assert!(strategy.long_call.is_none());
        assert!(strategy.last_trade_date.is_none());

        // flat on a Friday: nothing new is opened
        step(&mut strategy, &mut broker, &slice(day(2024, 1, 12), 16));
        assert!(broker.holdings().is_empty());

        let report = strategy.on_end(&mut broker);
        assert_eq!(report.lines[1], "Weekend closes: 1");
    }
}
