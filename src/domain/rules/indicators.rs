//! Technical indicators over the rolling spot-price series.
//!
//! Values are computed on f64 closes via the `ta` crate and handed back as
//! `Option<f64>`: `None` means "not enough data". A `Some` value may still
//! be non-finite; the evaluation context checks finiteness and raises the
//! anomaly alert, so the distinction between the two cases is preserved.

use ta::Next;
use ta::indicators::{
    ExponentialMovingAverage, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};

use crate::domain::rules::dsl::{IndicatorKind, IndicatorParams};

const DEFAULT_RSI_PERIOD: u32 = 14;
const DEFAULT_MA_PERIOD: u32 = 20;
const DEFAULT_MACD: (u32, u32, u32) = (12, 26, 9);

/// Compute one indicator over a close series (oldest first).
pub fn compute(kind: IndicatorKind, params: &IndicatorParams, closes: &[f64]) -> Option<f64> {
    let value = match kind {
        IndicatorKind::Rsi => {
            let period = params.period.unwrap_or(DEFAULT_RSI_PERIOD) as usize;
            if closes.len() <= period {
                return None;
            }
            let mut rsi = RelativeStrengthIndex::new(period).ok()?;
            fold(&mut rsi, closes)
        }
        IndicatorKind::Ema => {
            let period = params.period.unwrap_or(DEFAULT_MA_PERIOD) as usize;
            if closes.len() < period {
                return None;
            }
            let mut ema = ExponentialMovingAverage::new(period).ok()?;
            fold(&mut ema, closes)
        }
        IndicatorKind::Sma => {
            let period = params.period.unwrap_or(DEFAULT_MA_PERIOD) as usize;
            if closes.len() < period {
                return None;
            }
            let mut sma = SimpleMovingAverage::new(period).ok()?;
            fold(&mut sma, closes)
        }
        IndicatorKind::MacdHist => {
            let fast = params.fast.unwrap_or(DEFAULT_MACD.0) as usize;
            let slow = params.slow.unwrap_or(DEFAULT_MACD.1) as usize;
            let signal = params.signal.unwrap_or(DEFAULT_MACD.2) as usize;
            if closes.len() < slow + signal {
                return None;
            }
            let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
            let mut last = None;
            for close in closes {
                last = Some(macd.next(*close));
            }
            last.map(|out| out.histogram)
        }
    };

    value
}

fn fold<I: Next<f64, Output = f64>>(indicator: &mut I, closes: &[f64]) -> Option<f64> {
    let mut last = None;
    for close in closes {
        last = Some(indicator.next(*close));
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_rsi_saturates_on_monotone_series() {
        let value = compute(IndicatorKind::Rsi, &IndicatorParams::default(), &ramp(50)).unwrap();
        // Straight up-trend pushes RSI toward 100.
        assert!(value > 90.0, "rsi was {value}");
    }

    #[test]
    fn test_sma_of_constant_series() {
        let closes = vec![42.0; 30];
        let value = compute(IndicatorKind::Sma, &IndicatorParams::default(), &closes).unwrap();
        assert!((value - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_data_is_none() {
        assert_eq!(
            compute(IndicatorKind::Rsi, &IndicatorParams::default(), &ramp(5)),
            None
        );
        assert_eq!(
            compute(IndicatorKind::MacdHist, &IndicatorParams::default(), &ramp(10)),
            None
        );
    }

    #[test]
    fn test_macd_hist_sign_follows_momentum() {
        // Up-ramp then plateau: histogram ends up negative as momentum fades.
        let mut closes = ramp(60);
        closes.extend(std::iter::repeat(closes[59]).take(20));
        let value =
            compute(IndicatorKind::MacdHist, &IndicatorParams::default(), &closes).unwrap();
        assert!(value < 0.0, "histogram was {value}");
    }

    #[test]
    fn test_custom_period() {
        let params = IndicatorParams {
            period: Some(5),
            ..Default::default()
        };
        let closes = ramp(10);
        // SMA(5) over the 105..109 tail = 107
        let value = compute(IndicatorKind::Sma, &params, &closes).unwrap();
        assert!((value - 107.0).abs() < 1e-9, "sma was {value}");
    }
}
