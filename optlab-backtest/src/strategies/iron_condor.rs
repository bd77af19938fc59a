//! 0DTE iron condor.
//!
//! Shortly after the open, sell a put and a call about $5 out of the money
//! and buy $2 wings beyond them, all expiring today. Everything is closed at
//! the end of the day.

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backtest::{Broker, BrokerError, Fill};
use crate::data::{OptionQuote, OptionsSnapshot};
use crate::selection::{closest_by, ChainFilter};

use super::{Strategy, StrategyReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroDteIronCondorConfig {
    /// First bar at or after this time triggers the day's attempt.
    pub trigger_time: NaiveTime,
    /// Target distance of the short strikes from the underlying.
    pub short_offset: Decimal,
    /// Target distance of the long wings from the short strikes.
    pub wing_width: Decimal,
    pub contracts: i32,
    pub filter: ChainFilter,
}

impl Default for ZeroDteIronCondorConfig {
    fn default() -> Self {
        Self {
            trigger_time: NaiveTime::from_hms_opt(9, 32, 0).unwrap_or_default(),
            short_offset: Decimal::from(5),
            wing_width: Decimal::TWO,
            contracts: 1,
            // Daily expirations are kept. Without them only standard
            // monthlies remain, which rarely expire on the trading day;
            // set `filter.include_weeklys = false` for that universe.
            filter: ChainFilter::new(40, 40, 0, 1),
        }
    }
}

/// The four legs, strikes ascending.
#[derive(Debug, Clone, Copy)]
pub struct CondorLegs<'a> {
    pub long_put: &'a OptionQuote,
    pub short_put: &'a OptionQuote,
    pub short_call: &'a OptionQuote,
    pub long_call: &'a OptionQuote,
}

/// Pick condor legs from `quotes` around `price`.
pub fn select_legs<'a>(
    quotes: &[&'a OptionQuote],
    price: Decimal,
    short_offset: Decimal,
    wing_width: Decimal,
) -> Option<CondorLegs<'a>> {
    let puts = || quotes.iter().copied().filter(|q| q.is_put());
    let calls = || quotes.iter().copied().filter(|q| q.is_call());

    let short_put = closest_by(puts().filter(|q| q.strike < price), |q| {
        (q.strike - (price - short_offset)).abs()
    });
    let long_put = short_put.and_then(|sp| {
        closest_by(puts().filter(|q| q.strike < sp.strike), |q| {
            (q.strike - (sp.strike - wing_width)).abs()
        })
    });
    let short_call = closest_by(calls().filter(|q| q.strike > price), |q| {
        (q.strike - (price + short_offset)).abs()
    });
    let long_call = short_call.and_then(|sc| {
        closest_by(calls().filter(|q| q.strike > sc.strike), |q| {
            (q.strike - (sc.strike + wing_width)).abs()
        })
    });

    Some(CondorLegs {
        long_put: long_put?,
        short_put: short_put?,
        short_call: short_call?,
        long_call: long_call?,
    })
}

pub struct ZeroDteIronCondor {
    config: ZeroDteIronCondorConfig,
    trade_placed_today: bool,
    last_attempt: Option<NaiveDate>,
    condors_entered: usize,
    days_skipped: usize,
}

impl ZeroDteIronCondor {
    pub fn new(config: ZeroDteIronCondorConfig) -> Self {
        Self {
            config,
            trade_placed_today: false,
            last_attempt: None,
            condors_entered: 0,
            days_skipped: 0,
        }
    }

    fn log_chain(slice: &OptionsSnapshot) {
        let quotes = slice.total_quotes();
        info!("{} contracts found at {}", quotes, slice.timestamp);
        info!("Expirations available: {:?}", slice.expirations());

        let put_strikes: Vec<Decimal> = slice.puts().map(|q| q.strike).collect();
        if let (Some(lo), Some(hi)) = (put_strikes.iter().min(), put_strikes.iter().max()) {
            info!("Put strikes: {} to {}", lo, hi);
        }
        let call_strikes: Vec<Decimal> = slice.calls().map(|q| q.strike).collect();
        if let (Some(lo), Some(hi)) = (call_strikes.iter().min(), call_strikes.iter().max()) {
            info!("Call strikes: {} to {}", lo, hi);
        }
    }

    fn try_place(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        if slice.chains.is_empty() {
            info!("No option chain available.");
            return;
        }
        if slice.total_quotes() == 0 {
            info!("No contracts found in option chain.");
            return;
        }
        Self::log_chain(slice);

        let today = slice.date();
        let todays: Vec<&OptionQuote> = slice.quotes().filter(|q| q.expiration == today).collect();
        if todays.is_empty() {
            info!("No 0DTE contracts available at {}", slice.timestamp);
            return;
        }

        let Some(price) = slice.underlying_price.or_else(|| broker.underlying_price()) else {
            info!("No underlying price at {}", slice.timestamp);
            return;
        };

        let Some(legs) = select_legs(&todays, price, self.config.short_offset, self.config.wing_width)
        else {
            info!("Couldn't find all Iron Condor legs at {}", slice.timestamp);
            return;
        };

        match Self::submit(legs, self.config.contracts, broker) {
            Ok(_) => {
                self.trade_placed_today = true;
                self.condors_entered += 1;
                info!(
                    "Entered 0DTE Iron Condor at {} ({}P/{}P/{}C/{}C)",
                    slice.timestamp,
                    legs.long_put.strike,
                    legs.short_put.strike,
                    legs.short_call.strike,
                    legs.long_call.strike
                );
            }
            Err(e) => warn!(error = %e, "Iron condor rejected; legs unwound"),
        }
    }

    /// Place all four legs, unwinding what was filled if any leg fails.
    fn submit(legs: CondorLegs<'_>, contracts: i32, broker: &mut dyn Broker) -> Result<Vec<Fill>, BrokerError> {
        let orders: [(&OptionQuote, bool); 4] = [
            (legs.short_call, false),
            (legs.long_call, true),
            (legs.short_put, false),
            (legs.long_put, true),
        ];

        let mut fills = Vec::with_capacity(orders.len());
        for (quote, is_buy) in orders {
            let result = if is_buy {
                broker.buy(quote, contracts)
            } else {
                broker.sell(quote, contracts)
            };
            match result {
                Ok(fill) => fills.push(fill),
                Err(e) => {
                    for fill in &fills {
                        broker.liquidate(&fill.contract);
                    }
                    return Err(e);
                }
            }
        }
        Ok(fills)
    }
}

impl Default for ZeroDteIronCondor {
    fn default() -> Self {
        Self::new(ZeroDteIronCondorConfig::default())
    }
}

impl Strategy for ZeroDteIronCondor {
    fn name(&self) -> &str {
        "zero_dte_iron_condor"
    }

    fn chain_filter(&self) -> ChainFilter {
        self.config.filter.clone()
    }

    fn on_data(&mut self, slice: &OptionsSnapshot, broker: &mut dyn Broker) {
        let today = slice.date();
        if slice.time() < self.config.trigger_time || self.last_attempt == Some(today) {
            return;
        }
        self.last_attempt = Some(today);

        if self.trade_placed_today {
            return;
        }
        self.try_place(slice, broker);
        if !self.trade_placed_today {
            self.days_skipped += 1;
        }
    }

    fn on_end_of_day(&mut self, date: NaiveDate, broker: &mut dyn Broker) {
        if !broker.holdings().is_empty() {
            broker.liquidate_all();
            info!("Exited all positions at end of day: {}", date);
        }
        self.trade_placed_today = false;
    }

    fn on_end(&mut self, broker: &mut dyn Broker) -> StrategyReport {
        let mut report = StrategyReport::new("=== 0DTE Iron Condor Summary ===");
        report.push(format!("Condors entered: {}", self.condors_entered));
        report.push(format!("Days skipped: {}", self.days_skipped));
        report.push(format!("Portfolio value: {:.2}", broker.portfolio_value()));
        report
    }
}
