//! Position model owned by a single per-symbol state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Why a position was closed. Every closed position carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    /// Operator-requested close, outside of TP/SL/trailing logic
    Forced,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::Forced => "FORCED",
        }
    }
}

/// Lifecycle stage of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Entry filled, exits being monitored
    Open,
    /// Exit order placed, awaiting fill
    Exiting,
}

/// An open position. Mutated only by the owning symbol's state machine:
/// the trailing fields ratchet as price moves favorably, everything else is
/// fixed at entry fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,

    /// Take-profit level computed at entry
    pub tp_price: Decimal,

    /// Stop level; starts at the computed stop-loss and only ever tightens
    pub sl_price: Decimal,

    /// Most favorable price seen since trailing activated
    pub trailing_anchor: Option<Decimal>,

    /// Set once the trailing ratchet has raised the stop at least once;
    /// distinguishes a TRAILING_STOP exit from a plain STOP_LOSS
    pub trailing_armed: bool,

    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Signed unrealized PnL fraction at `price` (positive = gain).
    pub fn unrealized_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Buy => (price - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - price) / self.entry_price,
        }
    }
}

/// Archival record of a closed position, emitted to the trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,

    /// Quote-asset PnL
    pub pnl: Decimal,

    /// PnL as a fraction of entry price
    pub pnl_pct: Decimal,

    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    /// Build the archival record from a position and its exit fill.
    pub fn from_fill(
        position: &Position,
        exit_price: Decimal,
        closed_at: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> Self {
        let pnl_pct = position.unrealized_pct(exit_price);
        let pnl = match position.side {
            Side::Buy => (exit_price - position.entry_price) * position.quantity,
            Side::Sell => (position.entry_price - exit_price) * position.quantity,
        };

        Self {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl,
            pnl_pct,
            opened_at: position.opened_at,
            closed_at,
            exit_reason,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        (self.closed_at - self.opened_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(side: Side, entry: Decimal) -> Position {
        Position {
            id: "pos-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: entry,
            quantity: dec!(0.002),
            tp_price: dec!(0),
            sl_price: dec!(0),
            trailing_anchor: None,
            trailing_armed: false,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn test_unrealized_pct_by_side() {
        let long = make_position(Side::Buy, dec!(50000));
        assert_eq!(long.unrealized_pct(dec!(50500)), dec!(0.01));
        assert_eq!(long.unrealized_pct(dec!(49500)), dec!(-0.01));

        let short = make_position(Side::Sell, dec!(50000));
        assert_eq!(short.unrealized_pct(dec!(49500)), dec!(0.01));
        assert_eq!(short.unrealized_pct(dec!(50500)), dec!(-0.01));
    }

    #[test]
    fn test_closed_trade_pnl() {
        let mut pos = make_position(Side::Buy, dec!(50000));
        pos.quantity = dec!(0.01);

        let closed = ClosedTrade::from_fill(&pos, dec!(50500), Utc::now(), ExitReason::TakeProfit);
        assert_eq!(closed.pnl, dec!(5.00));
        assert_eq!(closed.pnl_pct, dec!(0.01));
        assert_eq!(closed.exit_reason, ExitReason::TakeProfit);
    }
}
