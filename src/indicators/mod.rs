//! Indicator library - stateless SMA / ATR / velocity math
//!
//! Consumed by the trend filter, the position sizer, and the signal
//! monitor. Every function is pure; insufficient-data handling differs
//! deliberately per indicator (see each function).

use crate::types::Candle;

/// Simple moving average of the last `period` closes.
///
/// With fewer than `period` samples this degrades to the last available
/// close instead of failing; callers must treat that as a low-confidence
/// value. Returns `None` only for an empty input.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    let last = *closes.last()?;
    if period == 0 || closes.len() < period {
        return Some(last);
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Average True Range over `period` intervals, Wilder-style true range
/// with an arithmetic mean of the most recent `period` values.
///
/// Returns `None` when fewer than `period + 1` candles are available.
/// An absent ATR is a hard failure for sizing: never trade on it.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let prev_close = candles[i - 1].close;
        let c = &candles[i];
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// Percentage move from the oldest sample to the current price.
/// Sign indicates direction.
pub fn velocity_pct(oldest: f64, current: f64) -> f64 {
    (current - oldest) / oldest * 100.0
}
