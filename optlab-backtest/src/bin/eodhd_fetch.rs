//! EODHD option chain fetcher
//!
//! Downloads end-of-day option chains for every Friday in a date range and
//! saves each one as pretty JSON.
//!
//! # Usage
//!
//! ```bash
//! export EODHD_API_KEY=your-token
//!
//! eodhd-fetch --symbol SPY.US --from 2023-06-01 --to 2023-06-30 --out data/eodhd
//!
//! # Re-download dates that already have a file
//! eodhd-fetch --symbol SPY.US --from 2023-06-01 --to 2023-06-30 --force
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use optlab_backtest::data::{fridays, save_chain, ticker_of, EodhdClient};

#[derive(Parser)]
#[command(name = "eodhd-fetch")]
#[command(about = "Download Friday option chains from EODHD")]
struct Cli {
    /// Exchange-qualified symbol
    #[arg(long, default_value = "SPY.US")]
    symbol: String,

    /// First date (YYYY-MM-DD)
    #[arg(long)]
    from: String,

    /// Last date (YYYY-MM-DD)
    #[arg(long)]
    to: String,

    /// Output directory for JSON files
    #[arg(long, default_value = "data/eodhd")]
    out: PathBuf,

    /// Fetch dates even if their file exists
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("optlab_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let start = NaiveDate::parse_from_str(&cli.from, "%Y-%m-%d").context("Invalid from date")?;
    let end = NaiveDate::parse_from_str(&cli.to, "%Y-%m-%d").context("Invalid to date")?;

    let mut client = EodhdClient::from_env()
        .context("EODHD_API_KEY environment variable not set")??;

    let ticker = ticker_of(&cli.symbol).to_string();
    let dates = fridays(start, end);
    info!(
        symbol = %cli.symbol,
        dates = dates.len(),
        out = %cli.out.display(),
        "fetching option chains"
    );

    let pb = ProgressBar::new(dates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut saved = 0usize;
    let mut failed = 0usize;
    for date in dates {
        pb.set_message(date.to_string());

        let existing = cli
            .out
            .join(optlab_backtest::data::eodhd::chain_file_name(&ticker, date));
        if existing.exists() && !cli.force {
            pb.inc(1);
            continue;
        }

        match client.fetch_chain_json(&cli.symbol, date).await {
            Ok(body) => {
                let path = save_chain(&cli.out, &ticker, date, &body)?;
                pb.println(format!("Saved options chain for {} to {}", date, path.display()));
                saved += 1;
            }
            Err(e) => {
                warn!(%date, error = %e, "failed to fetch chain");
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    info!(saved, failed, requests = client.request_count(), "fetch complete");
    Ok(())
}
