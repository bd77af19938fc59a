//! Options strategies.
//!
//! Each strategy is a small state machine driven by the replay engine (or any
//! other host implementing [`Broker`]):
//! - `on_data` for every filtered slice
//! - `on_end_of_day` once per trading date
//! - `on_end` once, returning a printable summary
//!
//! Strategy callbacks never fail. Anything that prevents an action (no chain,
//! no matching contract, a rejected order) is logged and the event skipped.

pub mod bull_call;
pub mod calendar;
pub mod dip_leaps;
pub mod iron_condor;
pub mod leaps;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::backtest::Broker;
use crate::data::OptionsSnapshot;
use crate::selection::ChainFilter;

pub use bull_call::{BullCallSpread, BullCallSpreadConfig};
pub use calendar::{OvernightCalendar, OvernightCalendarConfig};
pub use dip_leaps::{DipLeap, DipLeapConfig};
pub use iron_condor::{ZeroDteIronCondor, ZeroDteIronCondorConfig};
pub use leaps::{LeapAccumulation, LeapAccumulationConfig};

/// Host callback contract.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Universe filter applied to every slice before `on_data`.
    fn chain_filter(&self) -> ChainFilter;

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker);

    fn on_end_of_day(&mut self, _date: NaiveDate, _broker: &mut dyn Broker) {}

    fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport;
}

/// End-of-run summary emitted by a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub title: String,
    pub lines: Vec<String>,
}

impl StrategyReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.title.is_empty() {
            out.push_str(&self.title);
            out.push('\n');
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

pub(crate) fn is_friday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Fri
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;

    use crate::data::{Greeks, OptionQuote, OptionType};

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_hms_opt(h, m, 0).unwrap()
    }

    /// Quote with a tight 0.10 market around `mid`.
    pub fn option(
        time: NaiveDateTime,
        expiration: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
        mid: Decimal,
        delta: f64,
        underlying: Decimal,
    ) -> OptionQuote {
        let half = Decimal::new(5, 2);
        OptionQuote {
            ticker: "SPY".into(),
            quote_time: time,
            expiration,
            dte: (expiration - time.date()).num_days() as i32,
            strike,
            option_type,
            underlying_price: underlying,
            bid: mid - half,
            ask: mid + half,
            mid,
            volume: 100,
            open_interest: 1000,
            implied_vol: 0.2,
            greeks: Greeks {
                delta,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_render() {
        let mut report = StrategyReport::new("Summary");
        assert!(report.is_empty());
        report.push("a");
        report.push(String::from("b"));
        assert_eq!(report.render(), "Summary\na\nb\n");
    }

    #[test]
    fn test_is_friday() {
        assert!(is_friday(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
        assert!(!is_friday(NaiveDate::from_ymd_opt(2024, 1, 6).unwrap()));
    }
}
