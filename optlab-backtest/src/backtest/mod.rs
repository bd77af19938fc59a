//! Paper replay of strategies over historical option snapshots.
//!
//! - `Broker` trait (what a strategy may ask of its host) and `PaperBroker`
//! - Slippage and commission models
//! - Holdings, fills and closed trade records
//! - Replay engine with equity curve and drawdown
//! - Parallel parameter sweeps

pub mod broker;
pub mod commission;
pub mod engine;
pub mod slippage;
pub mod sweep;
pub mod trade;

pub use broker::{Broker, BrokerError, PaperBroker};
pub use commission::CommissionModel;
pub use engine::{BacktestConfig, BacktestEngine, BacktestResult, EquityPoint};
pub use slippage::{Slippage, SlippageModel};
pub use sweep::{best_by_sharpe, run_sweep, SweepOutcome};
pub use trade::{ExitReason, Fill, Holding, Trade, TradeDirection, CONTRACT_MULTIPLIER};
