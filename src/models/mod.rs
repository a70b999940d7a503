//! Data models for candles, ticks, signals, positions, and ranking entries.

mod candle;
mod position;
mod ranking;
mod signal;

pub use candle::{Candle, PriceTick};
pub use position::{ClosedTrade, ExitReason, Position, PositionStatus};
pub use ranking::{MarketTicker, RankingEntry};
pub use signal::{Side, Signal, SignalFeatures};
