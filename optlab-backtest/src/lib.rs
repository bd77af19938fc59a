pub mod backtest;
pub mod config;
pub mod data;
pub mod metrics;
pub mod pmcc;
pub mod pricing;
pub mod selection;
pub mod strategies;

// Re-export commonly used types
pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, Broker, PaperBroker, SlippageModel, Trade};
pub use config::{RunConfig, StrategyConfig};
pub use data::{DataLoader, OptionQuote, OptionType, OptionsChain, OptionsSnapshot};
pub use metrics::{MetricsCalculator, PerformanceMetrics, TradeSummary};
pub use pricing::BlackScholes;
pub use selection::{ChainFilter, DeltaBand};
pub use strategies::{Strategy, StrategyReport};
