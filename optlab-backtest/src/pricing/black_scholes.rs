//! Black-Scholes-Merton prices and delta.
//!
//! At or past expiry (`time <= 0`) prices collapse to intrinsic value and
//! delta to 0 or +/-1.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::OptionType;

/// Calendar-day year fraction (365-day year).
pub fn year_fraction(days: i64) -> f64 {
    days as f64 / 365.0
}

/// Round half away from zero to cents.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackScholes {
    /// Risk-free interest rate
    pub rate: f64,
    /// Continuous dividend yield
    pub dividend: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: 0.01,
            dividend: 0.0,
        }
    }
}

impl BlackScholes {
    pub fn new(rate: f64, dividend: f64) -> Self {
        Self { rate, dividend }
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator =
            (spot / strike).ln() + (self.rate - self.dividend + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    fn norm_cdf(x: f64) -> f64 {
        Normal::standard().cdf(x)
    }

    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (spot - strike).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        spot * (-self.dividend * time).exp() * Self::norm_cdf(d1)
            - strike * (-self.rate * time).exp() * Self::norm_cdf(d2)
    }

    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (strike - spot).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        strike * (-self.rate * time).exp() * Self::norm_cdf(-d2)
            - spot * (-self.dividend * time).exp() * Self::norm_cdf(-d1)
    }

    pub fn price(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        match opt_type {
            OptionType::Call => self.call_price(spot, strike, time, vol),
            OptionType::Put => self.put_price(spot, strike, time, vol),
        }
    }

    pub fn delta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 {
            return match opt_type {
                OptionType::Call if spot > strike => 1.0,
                OptionType::Put if spot < strike => -1.0,
                _ => 0.0,
            };
        }

        let d1 = self.d1(spot, strike, time, vol);
        let discount = (-self.dividend * time).exp();

        match opt_type {
            OptionType::Call => discount * Self::norm_cdf(d1),
            OptionType::Put => discount * (Self::norm_cdf(d1) - 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_price_reference() {
        // S=100, K=100, T=1, r=5%, vol=20%: 10.45
        let bs = BlackScholes::new(0.05, 0.0);
        let price = bs.call_price(100.0, 100.0, 1.0, 0.20);
        assert!((price - 10.4506).abs() < 0.001);
    }

    #[test]
    fn test_put_call_parity() {
        let bs = BlackScholes::new(0.01, 0.0);
        let (s, k, t, v) = (400.0, 380.0, year_fraction(60), 0.20);
        let call = bs.call_price(s, k, t, v);
        let put = bs.put_price(s, k, t, v);
        let parity = s - k * (-bs.rate * t).exp();
        assert!((call - put - parity).abs() < 1e-9);
    }

    #[test]
    fn test_expired_is_intrinsic() {
        let bs = BlackScholes::default();
        assert_eq!(bs.call_price(105.0, 100.0, 0.0, 0.2), 5.0);
        assert_eq!(bs.call_price(95.0, 100.0, 0.0, 0.2), 0.0);
        assert_eq!(bs.put_price(95.0, 100.0, -1.0, 0.2), 5.0);
        assert_eq!(bs.delta(105.0, 100.0, 0.0, 0.2, OptionType::Call), 1.0);
        assert_eq!(bs.delta(105.0, 100.0, 0.0, 0.2, OptionType::Put), 0.0);
        assert_eq!(bs.delta(95.0, 100.0, 0.0, 0.2, OptionType::Put), -1.0);
    }

    #[test]
    fn test_delta_ranges() {
        let bs = BlackScholes::default();
        let itm = bs.delta(100.0, 95.0, year_fraction(60), 0.2, OptionType::Call);
        let otm = bs.delta(100.0, 103.0, year_fraction(45), 0.2, OptionType::Call);
        assert!(itm > 0.6 && itm < 0.9);
        assert!(otm > 0.2 && otm < 0.5);
        let put = bs.delta(100.0, 100.0, 0.5, 0.2, OptionType::Put);
        assert!(put < 0.0 && put > -1.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(-2.345_1), -2.35);
        assert_eq!(round2(3.0), 3.0);
    }
}
