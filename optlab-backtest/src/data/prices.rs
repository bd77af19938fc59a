//! Daily underlying price history.
//!
//! Read from a CSV export with at least `date` and `adj_close` columns.
//! Header names are normalized (lowercase, spaces to underscores) so both
//! `Adj Close` and `adj_close` exports load.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use super::loader::LoaderError;

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: String,
    adj_close: f64,
}

/// One day of underlying data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: f64,
}

/// Adjusted closes keyed by date.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    closes: BTreeMap<NaiveDate, f64>,
}

impl PriceHistory {
    pub fn from_bars(bars: impl IntoIterator<Item = PriceBar>) -> Self {
        Self {
            closes: bars.into_iter().map(|b| (b.date, b.close)).collect(),
        }
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        Self::from_reader(&mut reader)
    }

    fn from_reader<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Self, LoaderError> {
        let headers: csv::StringRecord = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase().replace(' ', "_"))
            .collect();
        reader.set_headers(headers);

        let mut closes = BTreeMap::new();
        for row in reader.deserialize() {
            let row: PriceRow = row?;
            let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d").map_err(|e| {
                LoaderError::InvalidData(format!("invalid date {:?}: {}", row.date, e))
            })?;
            closes.insert(date, row.adj_close);
        }
        Ok(Self { closes })
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.closes.get(&date).copied()
    }

    /// Dates in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.closes.keys().copied()
    }

    pub fn bars(&self) -> impl Iterator<Item = PriceBar> + '_ {
        self.closes
            .iter()
            .map(|(date, close)| PriceBar { date: *date, close: *close })
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}
