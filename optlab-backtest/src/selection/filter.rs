//! Universe filter applied to every snapshot before a strategy sees it.
//!
//! Mirrors the usual brokerage-side chain subscription: a window of strikes
//! around the money, an expiration (DTE) window, and whether weekly
//! expirations are included.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{OptionsChain, OptionsSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainFilter {
    /// Number of listed strikes kept below the ATM strike.
    pub strikes_below: usize,
    /// Number of listed strikes kept above the ATM strike.
    pub strikes_above: usize,
    pub min_dte: i32,
    pub max_dte: i32,
    /// Keep non-standard (weekly/daily) expirations.
    pub include_weeklys: bool,
}

impl Default for ChainFilter {
    fn default() -> Self {
        Self {
            strikes_below: 10,
            strikes_above: 10,
            min_dte: 0,
            max_dte: 30,
            include_weeklys: true,
        }
    }
}

impl ChainFilter {
    pub fn new(strikes_below: usize, strikes_above: usize, min_dte: i32, max_dte: i32) -> Self {
        Self {
            strikes_below,
            strikes_above,
            min_dte,
            max_dte,
            include_weeklys: true,
        }
    }

    pub fn monthly_only(mut self) -> Self {
        self.include_weeklys = false;
        self
    }

    /// Strike bounds (inclusive) implied by the window around `price`.
    ///
    /// `strikes` must be sorted ascending and deduplicated.
    pub fn strike_bounds(&self, strikes: &[Decimal], price: Decimal) -> Option<(Decimal, Decimal)> {
        let atm_idx = strikes
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| (**s - price).abs())
            .map(|(i, _)| i)?;
        let lo = atm_idx.saturating_sub(self.strikes_below);
        let hi = (atm_idx + self.strikes_above).min(strikes.len() - 1);
        Some((strikes[lo], strikes[hi]))
    }

    fn keeps_expiration(&self, chain: &OptionsChain) -> bool {
        if chain.dte < self.min_dte || chain.dte > self.max_dte {
            return false;
        }
        self.include_weeklys || is_standard_expiration(chain.expiration)
    }

    /// Filtered copy of the snapshot.
    ///
    /// Without an underlying price the strike window cannot be placed, so only
    /// the expiration rules apply.
    pub fn apply(&self, snapshot: &OptionsSnapshot) -> OptionsSnapshot {
        let mut out = OptionsSnapshot::new(
            snapshot.timestamp,
            &snapshot.ticker,
            snapshot.underlying_price,
        );

        let chains: Vec<&OptionsChain> = snapshot
            .chains
            .iter()
            .filter(|c| self.keeps_expiration(c))
            .collect();

        let bounds = snapshot.underlying_price.and_then(|price| {
            let mut strikes: Vec<Decimal> = chains.iter().flat_map(|c| c.strikes()).collect();
            strikes.sort();
            strikes.dedup();
            self.strike_bounds(&strikes, price)
        });

        for chain in chains {
            let mut kept = OptionsChain::new(chain.expiration, chain.dte);
            let in_window = |strike: Decimal| match bounds {
                Some((lo, hi)) => strike >= lo && strike <= hi,
                None => true,
            };
            kept.calls = chain.calls.iter().filter(|q| in_window(q.strike)).cloned().collect();
            kept.puts = chain.puts.iter().filter(|q| in_window(q.strike)).cloned().collect();
            if !kept.is_empty() {
                out.chains.push(kept);
            }
        }
        out
    }
}

/// Third Friday of the month, or the Thursday before it (holiday-shifted).
pub fn is_standard_expiration(date: NaiveDate) -> bool {
    let Some(third_friday) = NaiveDate::from_weekday_of_month_opt(date.year(), date.month(), Weekday::Fri, 3)
    else {
        return false;
    };
    date == third_friday || date.succ_opt() == Some(third_friday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Greeks, OptionQuote, OptionType};
    use rust_decimal_macros::dec;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn call(date: NaiveDate, exp: NaiveDate, strike: Decimal) -> OptionQuote {
        OptionQuote {
            ticker: "SPY".into(),
            quote_time: date.and_hms_opt(16, 0, 0).unwrap(),
            expiration: exp,
            dte: (exp - date).num_days() as i32,
            strike,
            option_type: OptionType::Call,
            underlying_price: dec!(100),
            bid: dec!(1),
            ask: dec!(1.1),
            mid: dec!(1.05),
            volume: 0,
            open_interest: 0,
            implied_vol: 0.2,
            greeks: Greeks::default(),
        }
    }

    fn snapshot() -> OptionsSnapshot {
        let today = day(2024, 1, 5);
        let mut snap = OptionsSnapshot::at_close(today, "SPY", Some(dec!(101.2)));
        for exp in [day(2024, 1, 12), day(2024, 1, 19), day(2024, 3, 15)] {
            for k in 95..=107 {
                snap.add_quote(call(today, exp, Decimal::from(k)));
            }
        }
        snap
    }

    #[test]
    fn test_standard_expiration() {
        assert!(is_standard_expiration(day(2024, 1, 19)));
        assert!(is_standard_expiration(day(2024, 1, 18)));
        assert!(!is_standard_expiration(day(2024, 1, 12)));
        assert!(is_standard_expiration(day(2024, 3, 15)));
    }

    #[test]
    fn test_strike_window_around_atm() {
        let filter = ChainFilter::new(2, 3, 0, 30);
        let out = filter.apply(&snapshot());

        assert_eq!(out.chains.len(), 2);
        let strikes = out.chains[0].strikes();
        assert_eq!(strikes, vec![dec!(99), dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
    }

    #[test]
    fn test_window_clamps_at_edges() {
        let filter = ChainFilter::new(50, 1, 0, 30);
        let out = filter.apply(&snapshot());
        let strikes = out.chains[0].strikes();
        assert_eq!(strikes.first(), Some(&dec!(95)));
        assert_eq!(strikes.last(), Some(&dec!(102)));
    }

    #[test]
    fn test_monthly_only_and_dte_window() {
        let filter = ChainFilter::new(10, 10, 0, 90).monthly_only();
        let out = filter.apply(&snapshot());
        assert_eq!(out.expirations(), vec![day(2024, 1, 19), day(2024, 3, 15)]);

        let filter = ChainFilter::new(10, 10, 60, 90);
        let out = filter.apply(&snapshot());
        assert_eq!(out.expirations(), vec![day(2024, 3, 15)]);
    }

    #[test]
    fn test_no_underlying_keeps_all_strikes() {
        let mut snap = snapshot();
        snap.underlying_price = None;
        let out = ChainFilter::new(1, 1, 0, 10).apply(&snap);
        assert_eq!(out.chains.len(), 1);
        assert_eq!(out.chains[0].calls.len(), 13);
    }
}
