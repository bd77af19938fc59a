//! Synthetic poor-man's covered call study.
//!
//! No option data is needed: every trading day a deep-ITM long call and an
//! OTM short call are priced with Black-Scholes from the underlying close,
//! held until the short expires, and re-priced from the close on that day.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::PriceHistory;
use crate::pricing::{round2, year_fraction, BlackScholes};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmccConfig {
    pub long_days: i64,
    pub short_days: i64,
    pub rate: f64,
    pub implied_vol: f64,
    pub start_date: NaiveDate,
    pub long_strike_factor: f64,
    pub short_strike_factor: f64,
    /// Book the expired short at intrinsic value instead of zero.
    pub settle_short_at_intrinsic: bool,
}

impl Default for PmccConfig {
    fn default() -> Self {
        Self {
            long_days: 60,
            short_days: 45,
            rate: 0.01,
            implied_vol: 0.20,
            start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            long_strike_factor: 0.95,
            short_strike_factor: 1.03,
            settle_short_at_intrinsic: false,
        }
    }
}

/// One simulated entry, as written to the trades CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmccRow {
    pub date: NaiveDate,
    pub spy_price: f64,
    pub long_strike: i64,
    pub short_strike: i64,
    pub debit: f64,
    pub pnl: f64,
    pub roi: f64,
    pub win: bool,
}

pub fn run(prices: &PriceHistory, config: &PmccConfig) -> Vec<PmccRow> {
    let bs = BlackScholes::new(config.rate, 0.0);
    let vol = config.implied_vol;
    let t_long = year_fraction(config.long_days);
    let t_short = year_fraction(config.short_days);
    let t_long_left = year_fraction(config.long_days - config.short_days);

    let mut rows = Vec::new();
    for date in prices.dates().filter(|d| *d >= config.start_date) {
        let exit = date + Duration::days(config.short_days);
        let (Some(spot), Some(spot_exit)) = (prices.get(date), prices.get(exit)) else {
            continue;
        };

        let k_long = (spot * config.long_strike_factor).round();
        let k_short = (spot * config.short_strike_factor).round();

        let long_open = round2(bs.call_price(spot, k_long, t_long, vol));
        let short_open = round2(bs.call_price(spot, k_short, t_short, vol));
        let long_close = round2(bs.call_price(spot_exit, k_long, t_long_left, vol));
        let short_close = if config.settle_short_at_intrinsic {
            round2((spot_exit - k_short).max(0.0))
        } else {
            0.0
        };

        let pnl = (long_close - long_open) + (short_open - short_close);
        let debit = long_open - short_open;

        rows.push(PmccRow {
            date,
            spy_price: round2(spot),
            long_strike: k_long as i64,
            short_strike: k_short as i64,
            debit: round2(debit),
            pnl: round2(pnl),
            roi: round2(pnl / debit),
            win: pnl > 0.0,
        });
    }

    info!("PMCC simulation produced {} entries", rows.len());
    rows
}

pub fn write_csv(rows: &[PmccRow], path: impl AsRef<Path>) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
