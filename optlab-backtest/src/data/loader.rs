//! Parquet storage for option chain snapshots.
//!
//! One file per ticker per year, one row per contract quote:
//! - ticker, trade_date, quote_time (optional), expir_date, strike, option_type
//! - stock_price, bid, ask, volume, open_interest, iv
//! - delta, gamma, theta, vega, rho
//!
//! Dates are stored as `YYYY-MM-DD` strings and times as `HH:MM:SS`. Files
//! without a `quote_time` column are daily data stamped at the 16:00 close.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{market_close, Greeks, OptionQuote, OptionType, OptionsSnapshot};

/// Columns every chain file must carry. `quote_time` is optional.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "ticker",
    "trade_date",
    "expir_date",
    "strike",
    "option_type",
    "stock_price",
    "bid",
    "ask",
    "volume",
    "open_interest",
    "iv",
    "delta",
    "gamma",
    "theta",
    "vega",
    "rho",
];

const DEDUP_COLUMNS: &[&str] = &[
    "ticker",
    "trade_date",
    "quote_time",
    "expir_date",
    "strike",
    "option_type",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Parquet chain loader rooted at a data directory.
pub struct DataLoader {
    data_dir: PathBuf,
}

impl DataLoader {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    fn parquet_path(&self, ticker: &str, year: i32) -> PathBuf {
        self.data_dir
            .join("chains")
            .join(ticker)
            .join(format!("{}_{}.parquet", ticker, year))
    }

    /// List available years for a ticker.
    pub fn available_years(&self, ticker: &str) -> Result<Vec<i32>, LoaderError> {
        let dir = self.data_dir.join("chains").join(ticker);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let prefix = format!("{}_", ticker);
        let mut years = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            let year = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".parquet"))
                .and_then(|y| y.parse::<i32>().ok());
            if let Some(year) = year {
                years.push(year);
            }
        }
        years.sort();
        Ok(years)
    }

    pub fn load_lazy(&self, ticker: &str, year: i32) -> Result<LazyFrame, LoaderError> {
        let path = self.parquet_path(ticker, year);
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }
        Ok(LazyFrame::scan_parquet(&path, ScanArgsParquet::default())?)
    }

    /// Load rows for a ticker between two dates (inclusive) across year files.
    pub fn load_date_range(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<DataFrame, LoaderError> {
        let mut frames = Vec::new();
        for year in start_date.year()..=end_date.year() {
            match self.load_lazy(ticker, year) {
                Ok(lf) => frames.push(lf),
                Err(LoaderError::FileNotFound(path)) => {
                    debug!(%path, "no chain file for year");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        if frames.is_empty() {
            return Err(LoaderError::InvalidData(format!(
                "No data found for {} between {} and {}",
                ticker, start_date, end_date
            )));
        }

        let combined = concat(&frames, UnionArgs::default())?;
        let filtered = combined.filter(
            col("trade_date")
                .gt_eq(lit(start_date.to_string()))
                .and(col("trade_date").lt_eq(lit(end_date.to_string()))),
        );
        Ok(filtered.collect()?)
    }

    /// Load chronological snapshots for a date range.
    pub fn load_snapshots(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OptionsSnapshot>, LoaderError> {
        let df = self.load_date_range(ticker, start_date, end_date)?;
        let snapshots = dataframe_to_snapshots(&df, ticker)?;
        info!(
            ticker,
            rows = df.height(),
            snapshots = snapshots.len(),
            "loaded option chains"
        );
        Ok(snapshots)
    }

    /// Write snapshots into the per-year files, merging with existing rows.
    pub fn save_snapshots(
        &self,
        ticker: &str,
        snapshots: &[OptionsSnapshot],
    ) -> Result<Vec<PathBuf>, LoaderError> {
        let mut by_year: BTreeMap<i32, Vec<&OptionsSnapshot>> = BTreeMap::new();
        for snapshot in snapshots {
            by_year.entry(snapshot.date().year()).or_default().push(snapshot);
        }

        let mut written = Vec::new();
        for (year, group) in by_year {
            let df = snapshots_to_dataframe(&group)?;
            let path = self.parquet_path(ticker, year);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut final_df = if path.exists() {
                let existing = LazyFrame::scan_parquet(&path, ScanArgsParquet::default())?;
                concat([existing, df.lazy()], UnionArgs::default())?
                    .unique(
                        Some(DEDUP_COLUMNS.iter().map(|c| (*c).into()).collect()),
                        UniqueKeepStrategy::Last,
                    )
                    .sort(["trade_date", "quote_time"], SortMultipleOptions::default())
                    .collect()?
            } else {
                df
            };

            let file = fs::File::create(&path)?;
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Zstd(None))
                .finish(&mut final_df)?;
            info!(path = %path.display(), rows = final_df.height(), "wrote chain file");
            written.push(path);
        }
        Ok(written)
    }
}

fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn decimal(v: Option<f64>) -> Decimal {
    v.and_then(Decimal::from_f64_retain)
        .map(|d| d.round_dp(4))
        .unwrap_or_default()
}

/// Group chain rows into snapshots keyed by quote timestamp.
pub fn dataframe_to_snapshots(
    df: &DataFrame,
    ticker: &str,
) -> Result<Vec<OptionsSnapshot>, LoaderError> {
    for name in EXPECTED_COLUMNS {
        if df.column(name).is_err() {
            return Err(LoaderError::InvalidData(format!("missing column {}", name)));
        }
    }

    let trade_dates = str_values(df, "trade_date")?;
    let quote_times = match df.column("quote_time") {
        Ok(_) => str_values(df, "quote_time")?,
        Err(_) => vec![None; df.height()],
    };
    let expirations = str_values(df, "expir_date")?;
    let option_types = str_values(df, "option_type")?;
    let strikes = f64_values(df, "strike")?;
    let stock_prices = f64_values(df, "stock_price")?;
    let bids = f64_values(df, "bid")?;
    let asks = f64_values(df, "ask")?;
    let volumes = i64_values(df, "volume")?;
    let open_interest = i64_values(df, "open_interest")?;
    let ivs = f64_values(df, "iv")?;
    let deltas = f64_values(df, "delta")?;
    let gammas = f64_values(df, "gamma")?;
    let thetas = f64_values(df, "theta")?;
    let vegas = f64_values(df, "vega")?;
    let rhos = f64_values(df, "rho")?;

    let mut snapshots: BTreeMap<NaiveDateTime, OptionsSnapshot> = BTreeMap::new();

    for idx in 0..df.height() {
        let Some(trade_date) = trade_dates[idx]
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let Some(expiration) = expirations[idx]
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let Some(option_type) = option_types[idx]
            .as_deref()
            .and_then(|s| s.parse::<OptionType>().ok())
        else {
            continue;
        };

        let time = quote_times[idx]
            .as_deref()
            .and_then(parse_time)
            .unwrap_or_else(market_close);
        let timestamp = trade_date.and_time(time);
        let underlying = stock_prices[idx].map(|p| decimal(Some(p)));

        let snapshot = snapshots
            .entry(timestamp)
            .or_insert_with(|| OptionsSnapshot::new(timestamp, ticker, underlying));
        if snapshot.underlying_price.is_none() {
            snapshot.underlying_price = underlying;
        }

        let bid = decimal(bids[idx]);
        let ask = decimal(asks[idx]);
        snapshot.add_quote(OptionQuote {
            ticker: ticker.to_string(),
            quote_time: timestamp,
            expiration,
            dte: (expiration - trade_date).num_days() as i32,
            strike: decimal(strikes[idx]),
            option_type,
            underlying_price: underlying.unwrap_or_default(),
            bid,
            ask,
            mid: (bid + ask) / Decimal::TWO,
            volume: volumes[idx].unwrap_or(0),
            open_interest: open_interest[idx].unwrap_or(0),
            implied_vol: ivs[idx].unwrap_or(0.0),
            greeks: Greeks {
                delta: deltas[idx].unwrap_or(0.0),
                gamma: gammas[idx].unwrap_or(0.0),
                theta: thetas[idx].unwrap_or(0.0),
                vega: vegas[idx].unwrap_or(0.0),
                rho: rhos[idx].unwrap_or(0.0),
            },
        });
    }

    Ok(snapshots.into_values().collect())
}

/// Flatten snapshots into the chain file schema.
pub fn snapshots_to_dataframe(snapshots: &[&OptionsSnapshot]) -> Result<DataFrame, LoaderError> {
    let rows: usize = snapshots.iter().map(|s| s.total_quotes()).sum();

    let mut ticker: Vec<String> = Vec::with_capacity(rows);
    let mut trade_date: Vec<String> = Vec::with_capacity(rows);
    let mut quote_time: Vec<String> = Vec::with_capacity(rows);
    let mut expir_date: Vec<String> = Vec::with_capacity(rows);
    let mut strike: Vec<f64> = Vec::with_capacity(rows);
    let mut option_type: Vec<&str> = Vec::with_capacity(rows);
    let mut stock_price: Vec<f64> = Vec::with_capacity(rows);
    let mut bid: Vec<f64> = Vec::with_capacity(rows);
    let mut ask: Vec<f64> = Vec::with_capacity(rows);
    let mut volume: Vec<i64> = Vec::with_capacity(rows);
    let mut open_interest: Vec<i64> = Vec::with_capacity(rows);
    let mut iv: Vec<f64> = Vec::with_capacity(rows);
    let mut delta: Vec<f64> = Vec::with_capacity(rows);
    let mut gamma: Vec<f64> = Vec::with_capacity(rows);
    let mut theta: Vec<f64> = Vec::with_capacity(rows);
    let mut vega: Vec<f64> = Vec::with_capacity(rows);
    let mut rho: Vec<f64> = Vec::with_capacity(rows);

    for snapshot in snapshots {
        let date = snapshot.date().format("%Y-%m-%d").to_string();
        let time = snapshot.time().format("%H:%M:%S").to_string();
        for q in snapshot.quotes() {
            ticker.push(q.ticker.clone());
            trade_date.push(date.clone());
            quote_time.push(time.clone());
            expir_date.push(q.expiration.format("%Y-%m-%d").to_string());
            strike.push(q.strike.try_into().unwrap_or(0.0));
            option_type.push(q.option_type.as_str());
            stock_price.push(q.underlying_price.try_into().unwrap_or(0.0));
            bid.push(q.bid.try_into().unwrap_or(0.0));
            ask.push(q.ask.try_into().unwrap_or(0.0));
            volume.push(q.volume);
            open_interest.push(q.open_interest);
            iv.push(q.implied_vol);
            delta.push(q.greeks.delta);
            gamma.push(q.greeks.gamma);
            theta.push(q.greeks.theta);
            vega.push(q.greeks.vega);
            rho.push(q.greeks.rho);
        }
    }

    let df = DataFrame::new(vec![
        Series::new("ticker".into(), ticker).into(),
        Series::new("trade_date".into(), trade_date).into(),
        Series::new("quote_time".into(), quote_time).into(),
        Series::new("expir_date".into(), expir_date).into(),
        Series::new("strike".into(), strike).into(),
        Series::new("option_type".into(), option_type).into(),
        Series::new("stock_price".into(), stock_price).into(),
        Series::new("bid".into(), bid).into(),
        Series::new("ask".into(), ask).into(),
        Series::new("volume".into(), volume).into(),
        Series::new("open_interest".into(), open_interest).into(),
        Series::new("iv".into(), iv).into(),
        Series::new("delta".into(), delta).into(),
        Series::new("gamma".into(), gamma).into(),
        Series::new("theta".into(), theta).into(),
        Series::new("vega".into(), vega).into(),
        Series::new("rho".into(), rho).into(),
    ])?;

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_df() -> DataFrame {
        df!(
            "ticker" => ["SPY", "SPY", "SPY"],
            "trade_date" => ["2024-01-12", "2024-01-12", "2024-01-19"],
            "expir_date" => ["2024-02-16", "2024-02-16", "2024-02-16"],
            "strike" => [470.0, 480.0, 470.0],
            "option_type" => ["C", "P", "C"],
            "stock_price" => [475.0, 475.0, 478.0],
            "bid" => [8.0, 6.0, 10.0],
            "ask" => [8.2, 6.4, 10.2],
            "volume" => [100i64, 50, 80],
            "open_interest" => [1000i64, 900, 1100],
            "iv" => [0.14, 0.15, 0.13],
            "delta" => [0.62, -0.55, 0.70],
            "gamma" => [0.02, 0.02, 0.02],
            "theta" => [-0.1, -0.1, -0.1],
            "vega" => [0.5, 0.5, 0.5],
            "rho" => [0.1, -0.1, 0.1]
        )
        .unwrap()
    }

    #[test]
    fn test_parquet_path() {
        let loader = DataLoader::new("data");
        let path = loader.parquet_path("SPY", 2020);
        assert_eq!(path, PathBuf::from("data/chains/SPY/SPY_2020.parquet"));
    }

    #[test]
    fn test_dataframe_to_snapshots_groups_by_date() {
        let snapshots = dataframe_to_snapshots(&sample_df(), "SPY").unwrap();
        assert_eq!(snapshots.len(), 2);

        let first = &snapshots[0];
        assert_eq!(first.date(), NaiveDate::from_ymd_opt(2024, 1, 12).unwrap());
        assert_eq!(first.time(), market_close());
        assert_eq!(first.underlying_price, Some(dec!(475)));
        assert_eq!(first.total_quotes(), 2);
        assert_eq!(first.chains[0].dte, 35);

        let call = &first.chains[0].calls[0];
        assert_eq!(call.strike, dec!(470));
        assert_eq!(call.mid, dec!(8.1));
        assert_eq!(call.greeks.delta, 0.62);
    }

    #[test]
    fn test_missing_column_rejected() {
        let df = sample_df().drop("delta").unwrap();
        let err = dataframe_to_snapshots(&df, "SPY").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidData(_)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DataLoader::new(dir.path());
        let snapshots = dataframe_to_snapshots(&sample_df(), "SPY").unwrap();

        let written = loader.save_snapshots("SPY", &snapshots).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(loader.available_years("SPY").unwrap(), vec![2024]);

        let loaded = loader
            .load_snapshots(
                "SPY",
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].underlying_price, Some(dec!(478)));
    }
}
