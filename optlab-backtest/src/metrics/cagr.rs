//! Compound annual growth rate from a total return.

use chrono::NaiveDate;

use super::summary::MetricsError;

/// Annualized growth in percent for a growth factor over `[start, end]`.
///
/// Years are calendar days / 365.
pub fn cagr_from_growth(growth: f64, start: NaiveDate, end: NaiveDate) -> Result<f64, MetricsError> {
    let days = (end - start).num_days();
    if days <= 0 {
        return Err(MetricsError::InvalidSpan { start, end });
    }
    let years = days as f64 / 365.0;
    Ok((growth.powf(1.0 / years) - 1.0) * 100.0)
}

/// CAGR in percent, rounded to 2 decimals, for a total return in percent
/// (1856.61 means the account grew to 19.5661x).
pub fn cagr_from_return(percent_return: f64, start: NaiveDate, end: NaiveDate) -> Result<f64, MetricsError> {
    let cagr = cagr_from_growth(1.0 + percent_return / 100.0, start, end)?;
    Ok((cagr * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_known_returns() {
        let (start, end) = (date("2013-01-02"), date("2025-06-18"));
        assert_eq!(cagr_from_return(1856.61, start, end).unwrap(), 26.94);
        assert_eq!(cagr_from_return(2461.35, start, end).unwrap(), 29.71);
    }

    #[test]
    fn test_one_year_is_the_return() {
        let cagr = cagr_from_return(12.5, date("2023-01-01"), date("2024-01-01")).unwrap();
        assert_eq!(cagr, 12.5);
    }

    #[test]
    fn test_empty_span_is_an_error() {
        let d = date("2024-01-01");
        assert!(matches!(
            cagr_from_return(10.0, d, d),
            Err(MetricsError::InvalidSpan { .. })
        ));
        assert!(cagr_from_return(10.0, date("2024-02-01"), d).is_err());
    }
}
