// =============================================================================
// Binance public klines — reference snapshot for the arena simulator
// =============================================================================
//
// Only the unauthenticated GET /api/v3/klines endpoint is used; no keys are
// read or sent. The client is blocking because ticks run on a dedicated
// blocking worker (see arena::service), never on an async executor thread.
// =============================================================================

use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::candles::{self, Candle};
use super::{MarketSnapshot, MarketSnapshotProvider};
use crate::error::ArenaError;

/// Bars fetched per refresh.
const KLINE_LIMIT: u32 = 240;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Fetches the reference series from Binance and reduces it to a snapshot.
pub struct BinanceKlineProvider {
    symbol: String,
    interval: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl BinanceKlineProvider {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Result<Self, ArenaError> {
        Self::with_base_url(symbol, interval, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        symbol: impl Into<String>,
        interval: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ArenaError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ArenaError::MissingSnapshot(format!("failed to build http client: {e}")))?;

        Ok(Self {
            symbol: symbol.into().to_uppercase(),
            interval: interval.into(),
            base_url: base_url.into(),
            client,
        })
    }

    /// GET /api/v3/klines.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime
    #[instrument(skip(self), fields(symbol = %self.symbol, interval = %self.interval), name = "binance::get_klines")]
    pub fn get_klines(&self, limit: u32) -> Result<Vec<Candle>, ArenaError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, self.symbol, self.interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ArenaError::MissingSnapshot(format!("GET /api/v3/klines failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .map_err(|e| ArenaError::MissingSnapshot(format!("failed to parse klines response: {e}")))?;

        if !status.is_success() {
            return Err(ArenaError::MissingSnapshot(format!(
                "Binance GET /api/v3/klines returned {status}: {body}"
            )));
        }

        parse_klines(&body)
    }
}

impl MarketSnapshotProvider for BinanceKlineProvider {
    fn refresh(&self) -> Result<MarketSnapshot, ArenaError> {
        let candles = self.get_klines(KLINE_LIMIT)?;
        let snapshot = candles::snapshot_from(&candles).ok_or_else(|| {
            ArenaError::MissingSnapshot(format!("no usable klines for {}@{}", self.symbol, self.interval))
        })?;
        debug!(close = snapshot.close, atr = snapshot.atr, bars = candles.len(), "market snapshot refreshed");
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("binance({}@{})", self.symbol, self.interval)
    }
}

impl std::fmt::Debug for BinanceKlineProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceKlineProvider")
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Decode a klines payload. Malformed rows are skipped, a non-array body is
/// an error.
fn parse_klines(body: &serde_json::Value) -> Result<Vec<Candle>, ArenaError> {
    let raw = body
        .as_array()
        .ok_or_else(|| ArenaError::MissingSnapshot("klines response is not an array".into()))?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(arr) = entry.as_array().filter(|a| a.len() >= 7) else {
            warn!("skipping malformed kline entry");
            continue;
        };

        let parsed = (
            parse_str_f64(&arr[1]),
            parse_str_f64(&arr[2]),
            parse_str_f64(&arr[3]),
            parse_str_f64(&arr[4]),
            parse_str_f64(&arr[5]),
        );
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = parsed else {
            warn!("skipping kline entry with non-numeric prices");
            continue;
        };

        candles.push(Candle::new(
            arr[0].as_i64().unwrap_or(0),
            open,
            high,
            low,
            close,
            volume,
            arr[6].as_i64().unwrap_or(0),
        ));
    }
    Ok(candles)
}

/// Binance encodes prices as strings; accept numbers too.
fn parse_str_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}
