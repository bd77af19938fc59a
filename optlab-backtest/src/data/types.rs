//! Core data types for options backtesting.
//!
//! A snapshot (one "slice" of market data) holds every option chain for one
//! underlying at one point in time. Strategies only ever see snapshots; they
//! never reach into the storage format.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl FromStr for OptionType {
    type Err = ParseOptionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" => Ok(Self::Call),
            "P" | "PUT" => Ok(Self::Put),
            _ => Err(ParseOptionTypeError(s.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown option type: {0:?}")]
pub struct ParseOptionTypeError(pub String);

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Greeks for an option contract.
///
/// A delta of exactly zero means the data source had no delta for the quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// Identity of a single listed contract.
///
/// Open positions, holdings and quotes are all keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId {
    pub ticker: String,
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub option_type: OptionType,
}

impl ContractId {
    pub fn new(ticker: &str, expiration: NaiveDate, strike: Decimal, option_type: OptionType) -> Self {
        Self {
            ticker: ticker.to_string(),
            expiration,
            strike,
            option_type,
        }
    }

    /// Calendar days from `date` until expiration (negative once expired).
    pub fn days_to_expiry(&self, date: NaiveDate) -> i64 {
        (self.expiration - date).num_days()
    }

    /// Value at expiration given the underlying price.
    pub fn intrinsic_value(&self, underlying: Decimal) -> Decimal {
        match self.option_type {
            OptionType::Call => (underlying - self.strike).max(Decimal::ZERO),
            OptionType::Put => (self.strike - underlying).max(Decimal::ZERO),
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.ticker,
            self.expiration.format("%Y-%m-%d"),
            self.strike.normalize(),
            self.option_type.as_str()
        )
    }
}

/// A single option quote at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Underlying symbol (e.g., "SPY")
    pub ticker: String,

    /// Time the quote was observed
    pub quote_time: NaiveDateTime,

    /// Option expiration date
    pub expiration: NaiveDate,

    /// Calendar days to expiration at quote time
    pub dte: i32,

    /// Strike price
    pub strike: Decimal,

    /// Option type (call or put)
    pub option_type: OptionType,

    /// Underlying price at quote time
    pub underlying_price: Decimal,

    pub bid: Decimal,
    pub ask: Decimal,

    /// Mid price (calculated)
    pub mid: Decimal,

    pub volume: i64,
    pub open_interest: i64,

    /// Implied volatility (annualized, decimal)
    pub implied_vol: f64,

    pub greeks: Greeks,
}

impl OptionQuote {
    pub fn contract_id(&self) -> ContractId {
        ContractId::new(&self.ticker, self.expiration, self.strike, self.option_type)
    }

    pub fn is_call(&self) -> bool {
        self.option_type == OptionType::Call
    }

    pub fn is_put(&self) -> bool {
        self.option_type == OptionType::Put
    }

    /// Whether the source supplied a usable delta.
    pub fn has_delta(&self) -> bool {
        self.greeks.delta != 0.0 && self.greeks.delta.is_finite()
    }
}

/// All options for a single expiration date.
#[derive(Debug, Clone, Default)]
pub struct OptionsChain {
    pub expiration: NaiveDate,
    pub dte: i32,
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

impl OptionsChain {
    pub fn new(expiration: NaiveDate, dte: i32) -> Self {
        Self {
            expiration,
            dte,
            calls: Vec::new(),
            puts: Vec::new(),
        }
    }

    /// Add a quote to the appropriate side.
    pub fn add_quote(&mut self, quote: OptionQuote) {
        match quote.option_type {
            OptionType::Call => self.calls.push(quote),
            OptionType::Put => self.puts.push(quote),
        }
    }

    /// All strikes listed in this chain, ascending and deduplicated.
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut strikes: Vec<_> = self
            .calls
            .iter()
            .chain(self.puts.iter())
            .map(|q| q.strike)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }
}

/// Complete options snapshot for one underlying at one point in time.
#[derive(Debug, Clone)]
pub struct OptionsSnapshot {
    pub timestamp: NaiveDateTime,

    pub ticker: String,

    /// Underlying price; `None` when the slice carried no equity data.
    pub underlying_price: Option<Decimal>,

    /// Chains sorted by expiration
    pub chains: Vec<OptionsChain>,
}

impl OptionsSnapshot {
    pub fn new(timestamp: NaiveDateTime, ticker: &str, underlying_price: Option<Decimal>) -> Self {
        Self {
            timestamp,
            ticker: ticker.to_string(),
            underlying_price,
            chains: Vec::new(),
        }
    }

    /// Daily snapshot stamped at the 16:00 close.
    pub fn at_close(date: NaiveDate, ticker: &str, underlying_price: Option<Decimal>) -> Self {
        Self::new(date.and_time(market_close()), ticker, underlying_price)
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.timestamp.time()
    }

    /// Insert a quote, creating its expiration chain if needed.
    pub fn add_quote(&mut self, quote: OptionQuote) {
        match self
            .chains
            .binary_search_by_key(&quote.expiration, |c| c.expiration)
        {
            Ok(idx) => self.chains[idx].add_quote(quote),
            Err(idx) => {
                let mut chain = OptionsChain::new(quote.expiration, quote.dte);
                chain.add_quote(quote);
                self.chains.insert(idx, chain);
            }
        }
    }

    pub fn chain_at_expiration(&self, expiration: NaiveDate) -> Option<&OptionsChain> {
        self.chains.iter().find(|c| c.expiration == expiration)
    }

    pub fn expirations(&self) -> Vec<NaiveDate> {
        self.chains.iter().map(|c| c.expiration).collect()
    }

    pub fn calls(&self) -> impl Iterator<Item = &OptionQuote> {
        self.chains.iter().flat_map(|c| c.calls.iter())
    }

    pub fn puts(&self) -> impl Iterator<Item = &OptionQuote> {
        self.chains.iter().flat_map(|c| c.puts.iter())
    }

    pub fn quotes(&self) -> impl Iterator<Item = &OptionQuote> {
        self.chains
            .iter()
            .flat_map(|c| c.calls.iter().chain(c.puts.iter()))
    }

    pub fn find(&self, id: &ContractId) -> Option<&OptionQuote> {
        self.chain_at_expiration(id.expiration).and_then(|c| {
            let side = match id.option_type {
                OptionType::Call => &c.calls,
                OptionType::Put => &c.puts,
            };
            side.iter().find(|q| q.strike == id.strike)
        })
    }

    pub fn total_quotes(&self) -> usize {
        self.chains
            .iter()
            .map(|c| c.calls.len() + c.puts.len())
            .sum()
    }
}

pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(exp: NaiveDate, strike: Decimal, option_type: OptionType) -> OptionQuote {
        let date = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        OptionQuote {
            ticker: "SPY".to_string(),
            quote_time: date.and_time(market_close()),
            expiration: exp,
            dte: (exp - date).num_days() as i32,
            strike,
            option_type,
            underlying_price: dec!(475),
            bid: dec!(1.00),
            ask: dec!(1.20),
            mid: dec!(1.10),
            volume: 10,
            open_interest: 100,
            implied_vol: 0.15,
            greeks: Greeks::default(),
        }
    }

    #[test]
    fn test_option_type_parsing() {
        assert_eq!("C".parse(), Ok(OptionType::Call));
        assert_eq!("P".parse(), Ok(OptionType::Put));
        assert_eq!(" call".parse(), Ok(OptionType::Call));
        assert_eq!("PUT".parse(), Ok(OptionType::Put));
        assert_eq!(
            "X".parse::<OptionType>(),
            Err(ParseOptionTypeError("X".to_string()))
        );
    }

    #[test]
    fn test_snapshot_keeps_chains_sorted() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        let far = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let near = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();

        let mut snap = OptionsSnapshot::at_close(d, "SPY", Some(dec!(475)));
        snap.add_quote(quote(far, dec!(480), OptionType::Call));
        snap.add_quote(quote(near, dec!(475), OptionType::Call));
        snap.add_quote(quote(near, dec!(470), OptionType::Put));

        assert_eq!(snap.expirations(), vec![near, far]);
        assert_eq!(snap.total_quotes(), 3);
        assert_eq!(snap.calls().count(), 2);

        let id = ContractId::new("SPY", near, dec!(470), OptionType::Put);
        assert!(snap.find(&id).is_some());
        let missing = ContractId::new("SPY", near, dec!(470), OptionType::Call);
        assert!(snap.find(&missing).is_none());
    }

    #[test]
    fn test_intrinsic_value() {
        let exp = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
        let call = ContractId::new("SPY", exp, dec!(470), OptionType::Call);
        let put = ContractId::new("SPY", exp, dec!(470), OptionType::Put);
        assert_eq!(call.intrinsic_value(dec!(475)), dec!(5));
        assert_eq!(put.intrinsic_value(dec!(475)), dec!(0));
        assert_eq!(put.intrinsic_value(dec!(468.5)), dec!(1.5));
    }

    #[test]
    fn test_contract_display() {
        let exp = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();
        let id = ContractId::new("QQQ", exp, dec!(420.00), OptionType::Call);
        assert_eq!(id.to_string(), "QQQ 2024-02-16 420C");
    }
}
