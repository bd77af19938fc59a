//! Contract pickers.
//!
//! Every selection rule the strategies use reduces to a filter followed by
//! "closest to a target" on some attribute. Ties always resolve to the
//! earliest quote in chain order, so selection is deterministic.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::OptionQuote;

/// Tolerance when matching a quote to a target strike.
pub const STRIKE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Tolerance (days) when matching a quote to a target expiry.
pub const EXPIRY_TOLERANCE_DAYS: i64 = 1;

/// Delta range with a preferred target inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaBand {
    pub min: f64,
    pub max: f64,
    pub target: f64,
    /// Whether `min` and `max` themselves are in the band.
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl DeltaBand {
    pub fn inclusive(min: f64, max: f64, target: f64) -> Self {
        Self {
            min,
            max,
            target,
            inclusive: true,
        }
    }

    pub fn exclusive(min: f64, max: f64, target: f64) -> Self {
        Self {
            min,
            max,
            target,
            inclusive: false,
        }
    }

    pub fn contains(&self, delta: f64) -> bool {
        if self.inclusive {
            delta >= self.min && delta <= self.max
        } else {
            delta > self.min && delta < self.max
        }
    }

    /// A quote without a delta never matches.
    pub fn matches(&self, quote: &OptionQuote) -> bool {
        quote.has_delta() && self.contains(quote.greeks.delta)
    }

    pub fn distance(&self, quote: &OptionQuote) -> f64 {
        (quote.greeks.delta - self.target).abs()
    }

    /// Matching quotes ordered by distance to the target.
    pub fn candidates<'a>(
        &self,
        quotes: impl IntoIterator<Item = &'a OptionQuote>,
    ) -> Vec<&'a OptionQuote> {
        let matching = quotes.into_iter().filter(|q| self.matches(q)).collect();
        sorted_by_distance(matching, |q| self.distance(q))
    }
}

/// Stable ascending sort on an f64 key.
pub fn sorted_by_distance<'a, F>(mut quotes: Vec<&'a OptionQuote>, key: F) -> Vec<&'a OptionQuote>
where
    F: Fn(&OptionQuote) -> f64,
{
    quotes.sort_by(|a, b| key(a).partial_cmp(&key(b)).unwrap_or(Ordering::Equal));
    quotes
}

/// Quote minimising `key`; the first one wins ties.
pub fn closest_by<'a, I, K, F>(quotes: I, key: F) -> Option<&'a OptionQuote>
where
    I: IntoIterator<Item = &'a OptionQuote>,
    K: PartialOrd,
    F: Fn(&OptionQuote) -> K,
{
    let mut best: Option<(&'a OptionQuote, K)> = None;
    for quote in quotes {
        let k = key(quote);
        let better = match &best {
            Some((_, current)) => k < *current,
            None => true,
        };
        if better {
            best = Some((quote, k));
        }
    }
    best.map(|(q, _)| q)
}

/// Strike of the quote closest to `price`.
pub fn atm_strike<'a>(
    quotes: impl IntoIterator<Item = &'a OptionQuote>,
    price: Decimal,
) -> Option<Decimal> {
    closest_by(quotes, |q| (q.strike - price).abs()).map(|q| q.strike)
}

/// First quote at `strike` whose expiration is within a day of `expiry`.
pub fn find_contract<'a>(
    quotes: impl IntoIterator<Item = &'a OptionQuote>,
    strike: Decimal,
    expiry: NaiveDate,
) -> Option<&'a OptionQuote> {
    quotes.into_iter().find(|q| {
        (q.strike - strike).abs() < STRIKE_TOLERANCE
            && (q.expiration - expiry).num_days().abs() <= EXPIRY_TOLERANCE_DAYS
    })
}
