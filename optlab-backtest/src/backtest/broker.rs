//! Order routing and portfolio state.
//!
//! `Broker` is everything a strategy may ask of its host: the clock, orders,
//! holdings and portfolio value. `PaperBroker` implements it against replayed
//! snapshots.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::data::{market_close, ContractId, OptionQuote, OptionsSnapshot};

use super::commission::CommissionModel;
use super::slippage::SlippageModel;
use super::trade::{ExitReason, Fill, Holding, Trade, CONTRACT_MULTIPLIER};

#[derive(Error, Debug, PartialEq)]
pub enum BrokerError {
    #[error("No quote for {0}")]
    NoQuote(ContractId),

    #[error("Insufficient cash: need {needed}, have {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Host object model seen by strategies.
pub trait Broker {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Buy `quantity` contracts at the quote's ask side.
    fn buy(&mut self, quote: &OptionQuote, quantity: i32) -> Result<Fill>;

    /// Sell `quantity` contracts at the quote's bid side.
    fn sell(&mut self, quote: &OptionQuote, quantity: i32) -> Result<Fill>;

    /// Flatten one contract. `None` when nothing is held.
    fn liquidate(&mut self, contract: &ContractId) -> Option<Fill>;

    fn liquidate_all(&mut self) -> Vec<Fill>;

    /// Signed quantity held (0 when flat).
    fn quantity(&self, contract: &ContractId) -> i32;

    fn is_invested(&self, contract: &ContractId) -> bool {
        self.quantity(contract) != 0
    }

    /// Last mark (mid) of a held contract.
    fn mark_price(&self, contract: &ContractId) -> Option<Decimal>;

    fn underlying_price(&self) -> Option<Decimal>;

    /// Cash plus the marked value of all holdings.
    fn portfolio_value(&self) -> Decimal;

    fn cash(&self) -> Decimal;

    /// Sum of long quantities.
    fn open_contracts(&self) -> i32;

    fn holdings(&self) -> Vec<&Holding>;
}

/// Simulated broker for replays.
#[derive(Debug, Clone)]
pub struct PaperBroker {
    now: NaiveDateTime,
    cash: Decimal,
    underlying: Option<Decimal>,
    holdings: BTreeMap<ContractId, Holding>,
    slippage: SlippageModel,
    commission: CommissionModel,
    trades: Vec<Trade>,
    fill_count: usize,
    total_commission: Decimal,
}

impl PaperBroker {
    pub fn new(initial_cash: Decimal, slippage: SlippageModel, commission: CommissionModel) -> Self {
        Self {
            now: NaiveDateTime::MIN,
            cash: initial_cash,
            underlying: None,
            holdings: BTreeMap::new(),
            slippage,
            commission,
            trades: Vec::new(),
            fill_count: 0,
            total_commission: Decimal::ZERO,
        }
    }

    /// Frictionless broker: mid fills, no commission.
    pub fn frictionless(initial_cash: Decimal) -> Self {
        Self::new(initial_cash, SlippageModel::zero(), CommissionModel::zero())
    }

    /// Advance the clock and re-mark held contracts from `snapshot`.
    ///
    /// Contracts missing from the snapshot keep their last known quote.
    pub fn update(&mut self, snapshot: &OptionsSnapshot) {
        self.now = snapshot.timestamp;
        if snapshot.underlying_price.is_some() {
            self.underlying = snapshot.underlying_price;
        }
        for holding in self.holdings.values_mut() {
            if let Some(quote) = snapshot.find(&holding.contract) {
                holding.bid = quote.bid;
                holding.ask = quote.ask;
                holding.mark = quote.mid;
            }
        }
    }

    /// Settle holdings that expired before `date` at intrinsic value.
    pub fn settle_expired(&mut self, date: NaiveDate) -> Vec<Fill> {
        let expired: Vec<ContractId> = self
            .holdings
            .keys()
            .filter(|c| c.expiration < date)
            .cloned()
            .collect();

        let mut fills = Vec::with_capacity(expired.len());
        for contract in expired {
            let Some(holding) = self.holdings.get(&contract) else {
                continue;
            };
            let price = match self.underlying {
                Some(underlying) => contract.intrinsic_value(underlying),
                None => holding.mark,
            };
            let quantity = -holding.quantity;
            let time = contract.expiration.and_time(market_close());
            debug!(%contract, %price, "settling expired holding");
            fills.push(self.apply_fill(
                &contract,
                quantity,
                price,
                Decimal::ZERO,
                time,
                ExitReason::Expired,
            ));
        }
        fills
    }

    /// Flatten every holding, recording `reason` on the closed trades.
    pub fn close_all(&mut self, reason: ExitReason) -> Vec<Fill> {
        let contracts: Vec<ContractId> = self.holdings.keys().cloned().collect();
        contracts
            .iter()
            .filter_map(|c| self.liquidate_with(c, reason))
            .collect()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn fill_count(&self) -> usize {
        self.fill_count
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    /// Marked value of all holdings.
    pub fn positions_value(&self) -> Decimal {
        self.holdings.values().map(Holding::market_value).sum()
    }

    fn liquidate_with(&mut self, contract: &ContractId, reason: ExitReason) -> Option<Fill> {
        let holding = self.holdings.get(contract)?;
        let quantity = -holding.quantity;
        let slippage = self.slippage.for_legs(1);
        let price = if quantity > 0 {
            slippage.buy_fill(holding.bid, holding.ask)
        } else {
            slippage.sell_fill(holding.bid, holding.ask)
        };
        let commission = self.commission.for_order(quantity);
        let now = self.now;
        Some(self.apply_fill(contract, quantity, price, commission, now, reason))
    }

    fn check_order(quote: &OptionQuote, quantity: i32) -> Result<()> {
        if quantity <= 0 {
            return Err(BrokerError::InvalidQuantity(quantity));
        }
        if quote.bid <= Decimal::ZERO && quote.ask <= Decimal::ZERO {
            return Err(BrokerError::NoQuote(quote.contract_id()));
        }
        Ok(())
    }

    /// Book a signed fill, opening, adding to, reducing or flipping a holding.
    fn apply_fill(
        &mut self,
        contract: &ContractId,
        quantity: i32,
        price: Decimal,
        commission: Decimal,
        time: NaiveDateTime,
        reason: ExitReason,
    ) -> Fill {
        let fill = Fill {
            contract: contract.clone(),
            time,
            quantity,
            price,
            commission,
        };
        self.cash += fill.cash_flow();
        self.total_commission += commission;
        self.fill_count += 1;

        let mut opening = quantity;
        let mut open_commission = commission;

        if let Some(holding) = self.holdings.get_mut(contract) {
            if holding.quantity.signum() == quantity.signum() {
                let held = Decimal::from(holding.quantity.abs());
                let added = Decimal::from(quantity.abs());
                holding.avg_price = (holding.avg_price * held + price * added) / (held + added);
                holding.quantity += quantity;
                holding.open_commission += commission;
                return fill;
            }

            let closing = quantity.abs().min(holding.quantity.abs());
            let exit_commission = commission * Decimal::from(closing) / Decimal::from(quantity.abs());
            let trade = Trade::close(holding, closing, time, price, exit_commission, reason);

            holding.open_commission -= holding.open_commission * Decimal::from(closing)
                / Decimal::from(holding.quantity.abs());
            holding.quantity += closing * quantity.signum();
            let flat = holding.quantity == 0;

            debug!(contract = %trade.contract, pnl = %trade.pnl, reason = ?reason, "closed");
            self.trades.push(trade);
            if flat {
                self.holdings.remove(contract);
            }

            opening = (quantity.abs() - closing) * quantity.signum();
            open_commission = commission - exit_commission;
        }

        if opening != 0 {
            self.holdings.insert(
                contract.clone(),
                Holding {
                    contract: contract.clone(),
                    quantity: opening,
                    avg_price: price,
                    opened_at: time,
                    open_commission,
                    bid: price,
                    ask: price,
                    mark: price,
                },
            );
        }
        fill
    }

    fn record_quote(&mut self, quote: &OptionQuote) {
        if let Some(holding) = self.holdings.get_mut(&quote.contract_id()) {
            holding.bid = quote.bid;
            holding.ask = quote.ask;
            holding.mark = quote.mid;
        }
    }
}

impl Broker for PaperBroker {
    fn now(&self) -> NaiveDateTime {
        self.now
    }

    fn buy(&mut self, quote: &OptionQuote, quantity: i32) -> Result<Fill> {
        Self::check_order(quote, quantity)?;
        let contract = quote.contract_id();
        let price = self.slippage.for_legs(1).buy_fill(quote.bid, quote.ask);
        let commission = self.commission.for_order(quantity);
        let needed = price * Decimal::from(quantity) * CONTRACT_MULTIPLIER + commission;

        // buying back a short never needs free cash
        if self.quantity(&contract) >= 0 && needed > self.cash {
            return Err(BrokerError::InsufficientCash {
                needed,
                available: self.cash,
            });
        }

        let now = self.now;
        let fill = self.apply_fill(&contract, quantity, price, commission, now, ExitReason::Strategy);
        self.record_quote(quote);
        Ok(fill)
    }

    fn sell(&mut self, quote: &OptionQuote, quantity: i32) -> Result<Fill> {
        Self::check_order(quote, quantity)?;
        let contract = quote.contract_id();
        let price = self.slippage.for_legs(1).sell_fill(quote.bid, quote.ask);
        let commission = self.commission.for_order(quantity);
        let now = self.now;
        let fill = self.apply_fill(&contract, -quantity, price, commission, now, ExitReason::Strategy);
        self.record_quote(quote);
        Ok(fill)
    }

    fn liquidate(&mut self, contract: &ContractId) -> Option<Fill> {
        self.liquidate_with(contract, ExitReason::Strategy)
    }

    fn liquidate_all(&mut self) -> Vec<Fill> {
        self.close_all(ExitReason::Strategy)
    }

    fn quantity(&self, contract: &ContractId) -> i32 {
        self.holdings.get(contract).map(|h| h.quantity).unwrap_or(0)
    }

    fn mark_price(&self, contract: &ContractId) -> Option<Decimal> {
        self.holdings.get(contract).map(|h| h.mark)
    }

    fn underlying_price(&self) -> Option<Decimal> {
        self.underlying
    }

    fn portfolio_value(&self) -> Decimal {
        self.cash + self.positions_value()
    }

    fn cash(&self) -> Decimal {
        self.cash
    }

    fn open_contracts(&self) -> i32 {
        self.holdings.values().map(|h| h.quantity.max(0)).sum()
    }

    fn holdings(&self) -> Vec<&Holding> {
        self.holdings.values().collect()
    }
}
