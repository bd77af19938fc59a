//! Summary statistics over a trades CSV (`pnl`, `roi`, `win` columns).

use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("No trades to summarize")]
    Empty,

    #[error("Invalid date span {start} to {end}")]
    InvalidSpan { start: NaiveDate, end: NaiveDate },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct TradeRow {
    pnl: f64,
    roi: f64,
    win: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeSummary {
    pub total_trades: usize,
    /// Percent, 1 decimal.
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub avg_roi: f64,
    /// Upper median (`sorted[n / 2]`).
    pub median_roi: f64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl TradeSummary {
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let mut reader = csv::Reader::from_path(path)?;
        Self::from_reader(&mut reader)
    }

    fn from_reader<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Self, MetricsError> {
        let headers: csv::StringRecord = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        reader.set_headers(headers);

        let mut pnl = Vec::new();
        let mut roi = Vec::new();
        let mut wins = 0usize;
        for row in reader.deserialize() {
            let row: TradeRow = row?;
            pnl.push(row.pnl);
            roi.push(row.roi);
            if row.win.trim() == "true" {
                wins += 1;
            }
        }
        Self::from_values(&pnl, &roi, wins)
    }

    fn from_values(pnl: &[f64], roi: &[f64], wins: usize) -> Result<Self, MetricsError> {
        let n = pnl.len();
        if n == 0 {
            return Err(MetricsError::Empty);
        }

        let mut sorted = roi.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Ok(Self {
            total_trades: n,
            win_rate: round_to(wins as f64 * 100.0 / n as f64, 1),
            avg_pnl: round_to(pnl.iter().sum::<f64>() / n as f64, 2),
            avg_roi: round_to(roi.iter().sum::<f64>() / n as f64, 2),
            median_roi: sorted[n / 2],
        })
    }
}

impl fmt::Display for TradeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PMCC Strategy Summary ===")?;
        writeln!(f, "Total Trades: {}", self.total_trades)?;
        writeln!(f, "Win Rate: {:.1}%", self.win_rate)?;
        writeln!(f, "Avg PnL: ${:.2}", self.avg_pnl)?;
        writeln!(f, "Avg ROI: {:.2}", self.avg_roi)?;
        writeln!(f, "Median ROI: {}", self.median_roi)?;
        write!(f, "==============================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRADES: &str = "date,spy_price,long_strike,short_strike,debit,pnl,roi,win\n\
        2010-01-04,92.55,88,95,4.97,1.20,0.24,true\n\
        2010-01-05,92.80,88,96,5.10,-2.04,-0.4,false\n\
        2010-01-06,92.86,88,96,5.12,0.51,0.1,true\n\
        2010-01-07,93.25,89,96,5.01,3.00,0.62,true\n";

    #[test]
    fn test_summary_values() {
        let mut reader = csv::Reader::from_reader(TRADES.as_bytes());
        let summary = TradeSummary::from_reader(&mut reader).unwrap();

        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.win_rate, 75.0);
        assert_eq!(summary.avg_pnl, 0.67);
        assert_eq!(summary.avg_roi, 0.14);
        // sorted: -0.4, 0.1, 0.24, 0.62
        assert_eq!(summary.median_roi, 0.24);
        assert!(summary.to_string().contains("Win Rate: 75.0%"));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date,pnl,roi,win").unwrap();
        let err = TradeSummary::from_csv(file.path()).unwrap_err();
        assert!(matches!(err, MetricsError::Empty));
    }

    #[test]
    fn test_missing_file() {
        assert!(TradeSummary::from_csv("/nonexistent/trades.csv").is_err());
    }
}
