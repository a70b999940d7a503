//! Candle and tick models fed in from the market-data collaborator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A closed OHLCV candle. Immutable once closed; per-symbol sequences are
/// append-only with non-decreasing open times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Trading pair, e.g. "BTCUSDT"
    pub symbol: String,

    /// Open time of the candle interval
    pub open_time: DateTime<Utc>,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,

    /// Base-asset volume traded during the interval
    pub volume: Decimal,
}

impl Candle {
    /// True range against the previous candle's close.
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// A live price observation, finer-grained than candle closes. Drives
/// TP/SL/trailing checks between candles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}
