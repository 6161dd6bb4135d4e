// =============================================================================
// Market Snapshot — the single `(close, atr)` pair the simulator draws against
// =============================================================================
//
// The arena does not persist or model market data. Each batch asks a
// provider for one fresh snapshot of a reference symbol/timeframe; how the
// provider obtains it is its own business.
// =============================================================================

pub mod binance;
pub mod candles;

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;

pub use binance::BinanceKlineProvider;

/// Latest close and volatility of the reference series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub close: f64,
    pub atr: f64,
}

impl MarketSnapshot {
    pub fn new(close: f64, atr: f64) -> Self {
        Self { close, atr }
    }

    /// ATR, or 0.4 % of the close when the provider could not compute one.
    pub fn effective_atr(&self) -> f64 {
        if self.atr > 0.0 {
            self.atr
        } else {
            self.close * 0.004
        }
    }
}

/// Source of market snapshots. Called from blocking context only.
pub trait MarketSnapshotProvider: Send + Sync {
    fn refresh(&self) -> Result<MarketSnapshot, ArenaError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Provider returning a constant snapshot.
#[derive(Debug, Clone)]
pub struct FixedSnapshot {
    snapshot: MarketSnapshot,
}

impl FixedSnapshot {
    pub fn new(close: f64, atr: f64) -> Self {
        Self {
            snapshot: MarketSnapshot::new(close, atr),
        }
    }
}

impl MarketSnapshotProvider for FixedSnapshot {
    fn refresh(&self) -> Result<MarketSnapshot, ArenaError> {
        if !self.snapshot.close.is_finite() || self.snapshot.close <= 0.0 {
            return Err(ArenaError::MissingSnapshot(format!(
                "fixed close {} is not a usable price",
                self.snapshot.close
            )));
        }
        Ok(self.snapshot)
    }

    fn describe(&self) -> String {
        format!("fixed(close={}, atr={})", self.snapshot.close, self.snapshot.atr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_atr_falls_back_to_close_fraction() {
        assert!((MarketSnapshot::new(1000.0, 0.0).effective_atr() - 4.0).abs() < 1e-9);
        assert!((MarketSnapshot::new(1000.0, 12.5).effective_atr() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn fixed_provider_rejects_unusable_close() {
        assert!(FixedSnapshot::new(100.0, 1.0).refresh().is_ok());
        assert!(matches!(
            FixedSnapshot::new(0.0, 1.0).refresh(),
            Err(ArenaError::MissingSnapshot(_))
        ));
    }
}
