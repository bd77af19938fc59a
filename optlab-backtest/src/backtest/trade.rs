//! Holdings, fills and completed round trips.
//!
//! A holding is a signed quantity of one contract:
//! - positive = long, negative = short
//! - average entry price per share (x100 per contract)
//! - last known bid/ask/mid from the most recent slice that quoted it

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::ContractId;

/// Shares per option contract.
pub const CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Direction of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    /// Sold to open.
    Short,
    /// Bought to open.
    Long,
}

/// Reason a holding was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Closed by a strategy order.
    Strategy,
    /// Settled at intrinsic value after expiration.
    Expired,
    /// End of backtest period.
    EndOfPeriod,
}

/// An executed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub contract: ContractId,
    pub time: NaiveDateTime,
    /// Signed: positive = bought, negative = sold.
    pub quantity: i32,
    pub price: Decimal,
    pub commission: Decimal,
}

impl Fill {
    /// Cash effect of the fill (negative for purchases).
    pub fn cash_flow(&self) -> Decimal {
        -self.price * Decimal::from(self.quantity) * CONTRACT_MULTIPLIER - self.commission
    }
}

/// An open position in one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub contract: ContractId,
    pub quantity: i32,
    pub avg_price: Decimal,
    pub opened_at: NaiveDateTime,
    /// Entry commission not yet attributed to a closed trade.
    pub open_commission: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mark: Decimal,
}

impl Holding {
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn direction(&self) -> TradeDirection {
        if self.is_short() {
            TradeDirection::Short
        } else {
            TradeDirection::Long
        }
    }

    /// Signed mark-to-market value.
    pub fn market_value(&self) -> Decimal {
        self.mark * Decimal::from(self.quantity) * CONTRACT_MULTIPLIER
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark - self.avg_price) * Decimal::from(self.quantity) * CONTRACT_MULTIPLIER
    }

    pub fn dte(&self, date: NaiveDate) -> i64 {
        self.contract.days_to_expiry(date)
    }
}

/// A closed round trip (or the closed part of a holding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub contract: ContractId,
    pub direction: TradeDirection,
    /// Contracts closed (unsigned).
    pub quantity: i32,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Entry and exit commission attributed to this trade.
    pub commission: Decimal,
    /// Net of commission.
    pub pnl: Decimal,
    pub exit_reason: ExitReason,
}

impl Trade {
    /// Close `quantity` contracts of `holding` at `exit_price`.
    ///
    /// Entry commission is attributed pro rata to the closed quantity.
    pub fn close(
        holding: &Holding,
        quantity: i32,
        exit_time: NaiveDateTime,
        exit_price: Decimal,
        exit_commission: Decimal,
        exit_reason: ExitReason,
    ) -> Self {
        let quantity = quantity.abs();
        let entry_commission = if holding.quantity == 0 {
            Decimal::ZERO
        } else {
            holding.open_commission * Decimal::from(quantity)
                / Decimal::from(holding.quantity.abs())
        };
        let sign = if holding.is_short() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        };
        let gross = (exit_price - holding.avg_price)
            * sign
            * Decimal::from(quantity)
            * CONTRACT_MULTIPLIER;
        let commission = entry_commission + exit_commission;

        Self {
            contract: holding.contract.clone(),
            direction: holding.direction(),
            quantity,
            entry_time: holding.opened_at,
            exit_time,
            entry_price: holding.avg_price,
            exit_price,
            commission,
            pnl: gross - commission,
            exit_reason,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn days_held(&self) -> i64 {
        (self.exit_time.date() - self.entry_time.date()).num_days()
    }

    /// P&L relative to the premium paid or received.
    pub fn return_pct(&self) -> f64 {
        let basis = self.entry_price * Decimal::from(self.quantity) * CONTRACT_MULTIPLIER;
        if basis.is_zero() {
            return 0.0;
        }
        let pnl: f64 = self.pnl.try_into().unwrap_or(0.0);
        let basis: f64 = basis.try_into().unwrap_or(1.0);
        pnl / basis * 100.0
    }
}
