//! Performance metrics.
//!
//! - Replay statistics: win rate, profit factor, drawdown, Sharpe, Sortino, CAGR
//! - Summary of an exported trades CSV
//! - CAGR from a quoted total return

pub mod cagr;
pub mod calculator;
pub mod summary;

pub use cagr::{cagr_from_growth, cagr_from_return};
pub use calculator::{DrawdownAnalysis, MetricsCalculator, PerformanceMetrics};
pub use summary::{MetricsError, TradeSummary};
