//! Fill-price model.
//!
//! Fills land between bid and ask. `fill_pct` is how far across the spread a
//! buyer pays (1.0 = the ask) and, mirrored, how far a seller gives up
//! (1.0 = the bid). More legs traded together fill worse:
//!
//! | Legs | Fill % of spread |
//! |------|------------------|
//! | 1    | 75%              |
//! | 2    | 66%              |
//! | 3    | 56%              |
//! | 4    | 53%              |

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct Slippage {
    pub legs: usize,
    pub fill_pct: f64,
}

impl Slippage {
    fn pct(&self) -> Decimal {
        Decimal::from_f64_retain(self.fill_pct)
            .map(|d| d.round_dp(6))
            .unwrap_or(Decimal::ONE)
    }

    /// fill = bid + (ask - bid) * fill_pct
    pub fn buy_fill(&self, bid: Decimal, ask: Decimal) -> Decimal {
        if ask <= bid {
            return ask.max(bid);
        }
        bid + (ask - bid) * self.pct()
    }

    /// fill = bid + (ask - bid) * (1 - fill_pct)
    pub fn sell_fill(&self, bid: Decimal, ask: Decimal) -> Decimal {
        if ask <= bid {
            return bid.min(ask);
        }
        bid + (ask - bid) * (Decimal::ONE - self.pct())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageModel {
    /// Fill percentages by leg count (index 0 = single leg).
    pub fill_pcts: Vec<f64>,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self {
            fill_pcts: vec![0.75, 0.66, 0.56, 0.53],
        }
    }
}

impl SlippageModel {
    pub fn new(fill_pcts: Vec<f64>) -> Self {
        Self { fill_pcts }
    }

    /// Fills at mid.
    pub fn zero() -> Self {
        Self::new(vec![0.50])
    }

    /// Buys at the ask, sells at the bid.
    pub fn pessimistic() -> Self {
        Self::new(vec![1.0])
    }

    pub fn for_legs(&self, legs: usize) -> Slippage {
        let fill_pct = match legs {
            0 => self.fill_pcts.first().copied(),
            n => self
                .fill_pcts
                .get(n - 1)
                .or_else(|| self.fill_pcts.last())
                .copied(),
        }
        .unwrap_or(0.50);
        Slippage { legs, fill_pct }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_by_legs() {
        let model = SlippageModel::default();
        assert_eq!(model.for_legs(1).fill_pct, 0.75);
        assert_eq!(model.for_legs(2).fill_pct, 0.66);
        assert_eq!(model.for_legs(4).fill_pct, 0.53);
        assert_eq!(model.for_legs(6).fill_pct, 0.53);
    }

    #[test]
    fn test_buy_and_sell_fill() {
        let slippage = SlippageModel::default().for_legs(2);
        let buy = slippage.buy_fill(dec!(1.00), dec!(1.10));
        let sell = slippage.sell_fill(dec!(1.00), dec!(1.10));
        assert_eq!(buy, dec!(1.066));
        assert_eq!(sell, dec!(1.034));
    }

    #[test]
    fn test_zero_and_pessimistic() {
        let mid = SlippageModel::zero().for_legs(1);
        assert_eq!(mid.buy_fill(dec!(2), dec!(3)), dec!(2.5));
        assert_eq!(mid.sell_fill(dec!(2), dec!(3)), dec!(2.5));

        let worst = SlippageModel::pessimistic().for_legs(1);
        assert_eq!(worst.buy_fill(dec!(2), dec!(3)), dec!(3));
        assert_eq!(worst.sell_fill(dec!(2), dec!(3)), dec!(2));
    }

    #[test]
    fn test_crossed_or_locked_market() {
        let s = SlippageModel::default().for_legs(1);
        assert_eq!(s.buy_fill(dec!(1.5), dec!(1.5)), dec!(1.5));
        assert_eq!(s.sell_fill(dec!(1.6), dec!(1.5)), dec!(1.5));
    }
}
