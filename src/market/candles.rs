// =============================================================================
// Candles & ATR — volatility of the reference series
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the Wilder-smoothed average of TR:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use serde::{Deserialize, Serialize};

use super::MarketSnapshot;

/// Standard ATR look-back.
pub const ATR_PERIOD: usize = 14;

/// One OHLCV bar of the reference series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Most recent ATR of `candles` (oldest first).
///
/// `None` when `period` is zero, when there are fewer than `period + 1`
/// candles, or when any intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let (prev, bar) = (&pair[0], &pair[1]);
            if !(bar.high.is_finite() && bar.low.is_finite() && prev.close.is_finite()) {
                return f64::NAN;
            }
            let hl = bar.high - bar.low;
            let hc = (bar.high - prev.close).abs();
            let lc = (bar.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect();
    if tr_values.iter().any(|tr| !tr.is_finite()) {
        return None;
    }

    let seed = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

/// Reduce a candle series to the arena snapshot: last close plus ATR-14.
/// A missing ATR is reported as 0 and left to the simulator's fallback.
pub fn snapshot_from(candles: &[Candle]) -> Option<MarketSnapshot> {
    let last = candles.last()?;
    if !last.close.is_finite() || last.close <= 0.0 {
        return None;
    }
    let atr = calculate_atr(candles, ATR_PERIOD).unwrap_or(0.0);
    Some(MarketSnapshot::new(last.close, atr))
}
