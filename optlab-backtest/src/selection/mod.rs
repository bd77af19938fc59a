//! Contract selection.
//!
//! - Universe filtering (strike window around the money, DTE window, weeklys)
//! - Delta bands with a preferred target
//! - Closest-strike / closest-expiry pickers

pub mod filter;
pub mod pick;

pub use filter::{is_standard_expiration, ChainFilter};
pub use pick::{atm_strike, closest_by, find_contract, sorted_by_distance, DeltaBand};
