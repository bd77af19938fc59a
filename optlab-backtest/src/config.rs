//! Run configuration.
//!
//! A run is one strategy replayed over one ticker and date range:
//!
//! ```toml
//! ticker = "QQQ"
//! start_date = "2020-01-01"
//! end_date = "2022-01-01"
//! initial_cash = 100000
//!
//! [strategy]
//! kind = "bull_call_spread"
//! contracts = 1
//! ```
//!
//! Every strategy parameter has a default, so `kind` alone is enough.

use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backtest::{BacktestConfig, CommissionModel, SlippageModel};
use crate::strategies::{
    BullCallSpread, BullCallSpreadConfig, DipLeap, DipLeapConfig, LeapAccumulation,
    LeapAccumulationConfig, OvernightCalendar, OvernightCalendarConfig, Strategy,
    ZeroDteIronCondor, ZeroDteIronCondorConfig,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_initial_cash() -> Decimal {
    Decimal::from(100_000)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Label used in logs and sweep output.
    #[serde(default)]
    pub name: Option<String>,
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    #[serde(default)]
    pub slippage: SlippageModel,
    #[serde(default)]
    pub commission: CommissionModel,
    pub strategy: StrategyConfig,
}

/// Strategy parameters, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Calendar(OvernightCalendarConfig),
    BullCallSpread(BullCallSpreadConfig),
    Leaps(LeapAccumulationConfig),
    DipLeaps(DipLeapConfig),
    IronCondor(ZeroDteIronCondorConfig),
}

impl StrategyConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::Calendar(_) => "calendar",
            StrategyConfig::BullCallSpread(_) => "bull_call_spread",
            StrategyConfig::Leaps(_) => "leaps",
            StrategyConfig::DipLeaps(_) => "dip_leaps",
            StrategyConfig::IronCondor(_) => "iron_condor",
        }
    }

    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::Calendar(c) => Box::new(OvernightCalendar::new(c.clone())),
            StrategyConfig::BullCallSpread(c) => Box::new(BullCallSpread::new(c.clone())),
            StrategyConfig::Leaps(c) => Box::new(LeapAccumulation::new(c.clone())),
            StrategyConfig::DipLeaps(c) => Box::new(DipLeap::new(c.clone())),
            StrategyConfig::IronCondor(c) => Box::new(ZeroDteIronCondor::new(c.clone())),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            return Err(ConfigError::Invalid("ticker is empty".to_string()));
        }
        if self.end_date < self.start_date {
            return Err(ConfigError::Invalid(format!(
                "end_date {} is before start_date {}",
                self.end_date, self.start_date
            )));
        }
        if self.initial_cash <= Decimal::ZERO {
            return Err(ConfigError::Invalid("initial_cash must be positive".to_string()));
        }
        Ok(())
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.strategy.kind(), self.ticker))
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            initial_cash: self.initial_cash,
            slippage: self.slippage.clone(),
            commission: self.commission.clone(),
        }
    }

    pub fn build_strategy(&self) -> Box<dyn Strategy> {
        self.strategy.build()
    }
}
