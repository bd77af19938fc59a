//! Per-order commission model.
//!
//! Default: $1.00 per contract, no minimum or cap.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionModel {
    pub per_contract: Decimal,
    /// Minimum charged per order.
    #[serde(default)]
    pub min_per_order: Decimal,
    /// Cap per order (0 = uncapped).
    #[serde(default)]
    pub max_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_contract: Decimal::ONE,
            min_per_order: Decimal::ZERO,
            max_per_order: Decimal::ZERO,
        }
    }
}

impl CommissionModel {
    pub fn new(per_contract: Decimal) -> Self {
        Self {
            per_contract,
            ..Default::default()
        }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// Commission for one order of `contracts` (sign ignored).
    pub fn for_order(&self, contracts: i32) -> Decimal {
        let mut total = self.per_contract * Decimal::from(contracts.abs());

        if total < self.min_per_order {
            total = self.min_per_order;
        }
        if self.max_per_order > Decimal::ZERO && total > self.max_per_order {
            total = self.max_per_order;
        }
        total
    }

    /// Entry plus exit commission for the same size.
    pub fn round_trip(&self, contracts: i32) -> Decimal {
        self.for_order(contracts) * Decimal::TWO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_commission() {
        let model = CommissionModel::default();
        assert_eq!(model.for_order(10), dec!(10));
        assert_eq!(model.for_order(-3), dec!(3));
        assert_eq!(model.round_trip(10), dec!(20));
    }

    #[test]
    fn test_min_and_cap() {
        let model = CommissionModel {
            per_contract: dec!(0.65),
            min_per_order: dec!(1),
            max_per_order: dec!(5),
        };
        assert_eq!(model.for_order(1), dec!(1));
        assert_eq!(model.for_order(4), dec!(2.60));
        assert_eq!(model.for_order(100), dec!(5));
    }

    #[test]
    fn test_zero_commission() {
        assert_eq!(CommissionModel::zero().for_order(100), dec!(0));
    }
}
