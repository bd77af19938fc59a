//! EODHD client for end-of-day US equity option chains.
//!
//! Chains are fetched one trade date at a time from `/api/options/{SYMBOL}`
//! and saved verbatim as pretty JSON, one file per date:
//! `{out_dir}/{ticker}_options_{YYYY-MM-DD}.json` (ticker lowercased).
//! Saved files are read back into snapshots for backtesting or for
//! conversion into the parquet chain store.
//!
//! API constraints:
//! - One request per second (free and basic plans throttle harder otherwise)
//! - The API key is passed as `api_token`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::loader::LoaderError;
use super::types::{Greeks, OptionQuote, OptionType, OptionsSnapshot};

const BASE_URL: &str = "https://eodhistoricaldata.com/api/options";

const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum EodhdError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level options response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub last_trade_date: Option<String>,
    #[serde(default)]
    pub last_trade_price: Option<f64>,
    #[serde(default)]
    pub data: Vec<ExpirationBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationBlock {
    pub expiration_date: String,
    #[serde(default)]
    pub options: SidedContracts,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SidedContracts {
    #[serde(rename = "CALL", default)]
    pub calls: Vec<RawContract>,
    #[serde(rename = "PUT", default)]
    pub puts: Vec<RawContract>,
}

/// One contract as EODHD reports it. Any numeric field may be null.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    #[serde(default)]
    pub contract_name: Option<String>,
    pub strike: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub open_interest: Option<i64>,
    /// Reported in percent.
    #[serde(default)]
    pub implied_volatility: Option<f64>,
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub theta: Option<f64>,
    #[serde(default)]
    pub vega: Option<f64>,
    #[serde(default)]
    pub rho: Option<f64>,
}

fn decimal(v: f64) -> Decimal {
    Decimal::from_f64_retain(v)
        .map(|d| d.round_dp(4))
        .unwrap_or_default()
}

impl RawContract {
    fn to_quote(
        &self,
        ticker: &str,
        trade_date: NaiveDate,
        expiration: NaiveDate,
        option_type: OptionType,
        underlying: Decimal,
    ) -> Option<OptionQuote> {
        // A side with neither bid nor ask cannot be traded or marked.
        if self.bid.is_none() && self.ask.is_none() {
            return None;
        }
        let bid = decimal(self.bid.unwrap_or(0.0));
        let ask = decimal(self.ask.or(self.bid).unwrap_or(0.0));

        Some(OptionQuote {
            ticker: ticker.to_string(),
            quote_time: trade_date.and_time(super::types::market_close()),
            expiration,
            dte: (expiration - trade_date).num_days() as i32,
            strike: decimal(self.strike),
            option_type,
            underlying_price: underlying,
            bid,
            ask,
            mid: (bid + ask) / Decimal::TWO,
            volume: self.volume.unwrap_or(0),
            open_interest: self.open_interest.unwrap_or(0),
            implied_vol: self.implied_volatility.unwrap_or(0.0) / 100.0,
            greeks: Greeks {
                delta: self.delta.unwrap_or(0.0),
                gamma: self.gamma.unwrap_or(0.0),
                theta: self.theta.unwrap_or(0.0),
                vega: self.vega.unwrap_or(0.0),
                rho: self.rho.unwrap_or(0.0),
            },
        })
    }
}

impl ChainResponse {
    /// Convert to a close-of-day snapshot for `trade_date`.
    ///
    /// Contracts already expired on `trade_date` are dropped.
    pub fn to_snapshot(&self, ticker: &str, trade_date: NaiveDate) -> OptionsSnapshot {
        let underlying = self.last_trade_price.map(decimal);
        let mut snapshot = OptionsSnapshot::at_close(trade_date, ticker, underlying);
        let spot = underlying.unwrap_or_default();

        for block in &self.data {
            let Ok(expiration) = NaiveDate::parse_from_str(&block.expiration_date, "%Y-%m-%d")
            else {
                debug!(expiration = %block.expiration_date, "skipping unparseable expiration");
                continue;
            };
            if expiration < trade_date {
                continue;
            }

            let sides = [
                (OptionType::Call, &block.options.calls),
                (OptionType::Put, &block.options.puts),
            ];
            for (option_type, contracts) in sides {
                for contract in contracts {
                    if let Some(q) =
                        contract.to_quote(ticker, trade_date, expiration, option_type, spot)
                    {
                        snapshot.add_quote(q);
                    }
                }
            }
        }
        snapshot
    }
}

/// Rate-limited EODHD client.
pub struct EodhdClient {
    client: Client,
    api_key: String,
    last_request: Instant,
    request_count: u64,
}

impl EodhdClient {
    pub fn new(api_key: String) -> Result<Self, EodhdError> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            last_request: Instant::now() - MIN_REQUEST_INTERVAL,
            request_count: 0,
        })
    }

    /// Build from `EODHD_API_KEY`. Returns `None` when unset or empty.
    pub fn from_env() -> Option<Result<Self, EodhdError>> {
        let key = std::env::var("EODHD_API_KEY").ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some(Self::new(key))
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Fetch the raw chain for one trade date.
    pub async fn fetch_chain_json(
        &mut self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<serde_json::Value, EodhdError> {
        let elapsed = self.last_request.elapsed();
        if elapsed < MIN_REQUEST_INTERVAL {
            tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
        }

        let day = date.format("%Y-%m-%d").to_string();
        let url = format!("{}/{}", BASE_URL, symbol);
        let params = [
            ("api_token", self.api_key.as_str()),
            ("from", day.as_str()),
            ("to", day.as_str()),
            ("fmt", "json"),
        ];

        let response = self.client.get(&url).query(&params).send().await?;
        self.last_request = Instant::now();
        self.request_count += 1;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(symbol, %date, status = status.as_u16(), "chain request failed");
            return Err(EodhdError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Ticker part of an exchange-qualified symbol (`SPY.US` -> `SPY`).
pub fn ticker_of(symbol: &str) -> &str {
    symbol.split('.').next().unwrap_or(symbol)
}

pub fn chain_file_name(ticker: &str, date: NaiveDate) -> String {
    format!("{}_options_{}.json", ticker.to_lowercase(), date.format("%Y-%m-%d"))
}

/// Save a raw chain response as pretty JSON.
pub fn save_chain(
    out_dir: &Path,
    ticker: &str,
    date: NaiveDate,
    body: &serde_json::Value,
) -> Result<PathBuf, EodhdError> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(chain_file_name(ticker, date));
    fs::write(&path, serde_json::to_string_pretty(body)?)?;
    Ok(path)
}

/// Every Friday in `[start, end]`.
pub fn fridays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| d.weekday() == Weekday::Fri)
        .collect()
}

/// Read every saved chain file for `ticker` in `dir`, oldest first.
pub fn load_chain_dir(dir: &Path, ticker: &str) -> Result<Vec<OptionsSnapshot>, LoaderError> {
    if !dir.exists() {
        return Err(LoaderError::FileNotFound(dir.display().to_string()));
    }

    let prefix = format!("{}_options_", ticker.to_lowercase());
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let date = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        if let Some(date) = date {
            files.push((date, path));
        }
    }
    files.sort();

    let mut snapshots = Vec::with_capacity(files.len());
    for (date, path) in files {
        let content = fs::read_to_string(&path)?;
        let response: ChainResponse = serde_json::from_str(&content)?;
        snapshots.push(response.to_snapshot(&ticker.to_uppercase(), date));
    }
    Ok(snapshots)
}
