//! Entry signal emitted by the evaluator, at most once per candle close.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// The side of the order that closes a position opened on this side.
    pub fn closing(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Indicator values captured at signal time, logged for later analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalFeatures {
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    pub volume: Decimal,
    pub avg_volume: Decimal,
}

/// An entry signal. Immutable; consumed at most once by the owning state
/// machine within the same evaluation tick that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,

    /// Close price of the candle that triggered the signal
    pub price: Decimal,

    /// Open time of the triggering candle
    pub timestamp: DateTime<Utc>,

    pub features: SignalFeatures,
}
