//! Market-wide snapshot and ranking models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol 24h market statistics, one element of the periodic
/// market-wide snapshot the ranker consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTicker {
    pub symbol: String,
    pub last_price: Decimal,

    /// 24h traded volume in the quote asset
    pub quote_volume_24h: Decimal,

    /// 24h price change in percent (signed)
    pub price_change_pct: f64,

    pub high_24h: Decimal,
    pub low_24h: Decimal,

    pub bid: Decimal,
    pub ask: Decimal,
}

impl MarketTicker {
    /// Relative bid/ask gap as a fraction of the bid. A one-sided or empty
    /// book reports a prohibitively wide spread so the filter drops it.
    pub fn spread_pct(&self) -> Decimal {
        if self.bid.is_zero() || self.ask.is_zero() || self.ask < self.bid {
            return Decimal::MAX;
        }
        (self.ask - self.bid) / self.bid
    }

    /// Recent-range volatility: 24h high-low range over the low, in percent.
    pub fn range_volatility_pct(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        if self.low_24h.is_zero() || self.high_24h < self.low_24h {
            return 0.0;
        }
        ((self.high_24h - self.low_24h) / self.low_24h)
            .to_f64()
            .unwrap_or(0.0)
            * 100.0
    }
}

/// One row of the ranked top-N list. The ranked set is recomputed wholesale
/// every refresh interval and replaces the previous set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub symbol: String,
    pub score: f64,
    pub volume_24h: Decimal,
    pub spread_pct: Decimal,
    pub volatility_pct: f64,
    pub daily_change_pct: f64,
}
