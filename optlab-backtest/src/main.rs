//! Options strategy backtester.
//!
//! # Usage
//!
//! ```bash
//! # Replay one strategy config over parquet chains
//! optlab run --config config/bull_call_spread.toml --data data
//!
//! # Replay several configs in parallel
//! optlab sweep --config config/leaps.toml --config config/dip_leaps.toml --data data
//!
//! # Synthetic PMCC study from daily closes, then summarize it
//! optlab pmcc --prices data/spy_daily_full.csv --output results/trades.csv
//! optlab analyze --trades results/trades.csv
//!
//! # Annualize quoted total returns
//! optlab cagr --returns 1856.61 --returns 2461.35 --start 2013-01-02 --end 2025-06-18
//!
//! # Convert saved EODHD JSON chains into parquet
//! optlab convert --json-dir data/eodhd --data data --ticker SPY
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use optlab_backtest::backtest::{best_by_sharpe, run_sweep, BacktestEngine, SweepOutcome};
use optlab_backtest::config::RunConfig;
use optlab_backtest::data::{load_chain_dir, DataLoader, PriceHistory};
use optlab_backtest::metrics::{cagr_from_return, MetricsCalculator, TradeSummary};
use optlab_backtest::pmcc::{self, PmccConfig};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "optlab")]
#[command(about = "Options strategy backtesting over historical chains")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with given configuration
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Path to data directory
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Run several configurations in parallel
    Sweep {
        /// Configuration files (repeatable)
        #[arg(short, long, required = true)]
        config: Vec<PathBuf>,

        /// Path to data directory
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Synthetic poor-man's covered call study
    Pmcc {
        /// Daily price CSV with date and adj_close columns
        #[arg(short, long)]
        prices: PathBuf,

        /// Output trades CSV
        #[arg(short, long, default_value = "results/trades.csv")]
        output: PathBuf,

        /// Optional TOML overriding the study parameters
        #[arg(long)]
        params: Option<PathBuf>,
    },

    /// Summarize a trades CSV
    Analyze {
        #[arg(short, long, default_value = "results/trades.csv")]
        trades: PathBuf,
    },

    /// CAGR for total returns (percent) over a date range
    Cagr {
        #[arg(short, long, required = true)]
        returns: Vec<f64>,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },

    /// Convert saved EODHD chain JSON files to parquet
    Convert {
        #[arg(long)]
        json_dir: PathBuf,

        #[arg(short, long, default_value = "data")]
        data: PathBuf,

        #[arg(short, long)]
        ticker: String,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?}, expected YYYY-MM-DD", s))
}

fn cmd_run(config_path: PathBuf, data: PathBuf) -> Result<()> {
    let config = RunConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!(
        "Running {} on {} from {} to {}",
        config.label(),
        config.ticker,
        config.start_date,
        config.end_date
    );

    let loader = DataLoader::new(&data);
    let mut strategy = config.build_strategy();
    let mut engine = BacktestEngine::new(config.backtest_config());
    let result = engine
        .load_and_run(
            &loader,
            &config.ticker,
            config.start_date,
            config.end_date,
            strategy.as_mut(),
        )
        .context("Failed to load option chains")?;

    println!("\n{}", SEPARATOR);
    println!("{}", result.summary());
    println!("{}", SEPARATOR);
    println!("{}", MetricsCalculator::calculate(&result).summary());
    if !result.report.is_empty() {
        println!("{}", SEPARATOR);
        println!("{}", result.report.render());
    }
    Ok(())
}

fn cmd_sweep(config_paths: Vec<PathBuf>, data: PathBuf) -> Result<()> {
    let mut configs = Vec::with_capacity(config_paths.len());
    for path in &config_paths {
        configs.push(
            RunConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
        );
    }

    let mut by_ticker: BTreeMap<String, Vec<RunConfig>> = BTreeMap::new();
    for config in configs {
        by_ticker.entry(config.ticker.clone()).or_default().push(config);
    }

    let loader = DataLoader::new(&data);
    let mut outcomes: Vec<SweepOutcome> = Vec::new();
    for (ticker, group) in by_ticker {
        let (Some(start), Some(end)) = (
            group.iter().map(|c| c.start_date).min(),
            group.iter().map(|c| c.end_date).max(),
        ) else {
            continue;
        };
        let snapshots = loader
            .load_snapshots(&ticker, start, end)
            .with_context(|| format!("Failed to load {} chains", ticker))?;
        outcomes.extend(run_sweep(&group, &snapshots));
    }

    println!("\n{}", SEPARATOR);
    println!(
        "{:<28} {:>8} {:>10} {:>12} {:>8} {:>8}",
        "Config", "Trades", "Win %", "Return %", "MaxDD %", "Sharpe"
    );
    println!("{}", SEPARATOR);
    for outcome in &outcomes {
        let r = &outcome.result;
        println!(
            "{:<28} {:>8} {:>10.1} {:>12.2} {:>8.2} {:>8.2}",
            outcome.label,
            r.total_trades,
            r.win_rate() * 100.0,
            r.total_return_pct,
            r.max_drawdown_pct,
            r.sharpe_ratio()
        );
    }
    if let Some(best) = best_by_sharpe(&outcomes) {
        println!("\nBest by Sharpe: {}", best.label);
    }
    Ok(())
}

fn cmd_pmcc(prices: PathBuf, output: PathBuf, params: Option<PathBuf>) -> Result<()> {
    let config = match params {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<PmccConfig>(&text).context("Invalid PMCC parameters")?
        }
        None => PmccConfig::default(),
    };

    let history = PriceHistory::from_csv(&prices)
        .with_context(|| format!("Failed to load {}", prices.display()))?;
    let rows = pmcc::run(&history, &config);

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    pmcc::write_csv(&rows, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Backtest complete. Results saved to {}.", output.display());
    Ok(())
}

fn cmd_analyze(trades: PathBuf) -> Result<()> {
    let summary = TradeSummary::from_csv(&trades)
        .with_context(|| format!("Failed to summarize {}", trades.display()))?;
    println!("\n{}\n", summary);
    Ok(())
}

fn cmd_cagr(returns: Vec<f64>, start: String, end: String) -> Result<()> {
    let start_date = parse_date(&start)?;
    let end_date = parse_date(&end)?;
    for pct in returns {
        let cagr = cagr_from_return(pct, start_date, end_date)?;
        println!(
            "CAGR for {}% return from {} to {}: {}%",
            pct, start_date, end_date, cagr
        );
    }
    Ok(())
}

fn cmd_convert(json_dir: PathBuf, data: PathBuf, ticker: String) -> Result<()> {
    let snapshots = load_chain_dir(&json_dir, &ticker)
        .with_context(|| format!("Failed to read chains from {}", json_dir.display()))?;
    if snapshots.is_empty() {
        bail!("No {} chain files in {}", ticker, json_dir.display());
    }

    let loader = DataLoader::new(&data);
    let written = loader
        .save_snapshots(&ticker.to_uppercase(), &snapshots)
        .context("Failed to write parquet")?;
    println!(
        "Converted {} snapshots into {} file(s)",
        snapshots.len(),
        written.len()
    );
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("optlab_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data } => cmd_run(config, data)?,
        Commands::Sweep { config, data } => cmd_sweep(config, data)?,
        Commands::Pmcc {
            prices,
            output,
            params,
        } => cmd_pmcc(prices, output, params)?,
        Commands::Analyze { trades } => cmd_analyze(trades)?,
        Commands::Cagr {
            returns,
            start,
            end,
        } => cmd_cagr(returns, start, end)?,
        Commands::Convert {
            json_dir,
            data,
            ticker,
        } => cmd_convert(json_dir, data, ticker)?,
    }

    Ok(())
}
