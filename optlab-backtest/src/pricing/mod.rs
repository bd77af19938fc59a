//! Option pricing used by the synthetic backtests.

pub mod black_scholes;

pub use black_scholes::{round2, year_fraction, BlackScholes};
