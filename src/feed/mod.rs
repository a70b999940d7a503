//! Market-data collaborator contract: the event stream driving the engine.

mod replay;

pub use replay::ReplayFeed;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, MarketTicker, PriceTick};

/// Periodic market-wide snapshot used for ranking refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tickers: Vec<MarketTicker>,
}

/// Everything the engine reacts to, in arrival order. Candle events carry
/// their interval so one stream can interleave entry and trend timeframes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Candle { interval: String, candle: Candle },
    Tick { tick: PriceTick },
    Snapshot { snapshot: MarketSnapshot },
    /// Operator-requested close of a symbol's open position
    ForceExit {
        symbol: String,
        timestamp: DateTime<Utc>,
    },
}

impl MarketEvent {
    /// The symbol a per-symbol event routes to; None for market-wide events.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketEvent::Candle { candle, .. } => Some(&candle.symbol),
            MarketEvent::Tick { tick } => Some(&tick.symbol),
            MarketEvent::Snapshot { .. } => None,
            MarketEvent::ForceExit { symbol, .. } => Some(symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_round_trip() {
        let json = r#"{"type":"tick","tick":{"symbol":"BTCUSDT","price":"50100","timestamp":"2024-06-01T12:00:00Z"}}"#;
        let event: MarketEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.symbol(), Some("BTCUSDT"));
        let back = serde_json::to_string(&event).unwrap();
        let reparsed: MarketEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed.symbol(), Some("BTCUSDT"));
    }
}
