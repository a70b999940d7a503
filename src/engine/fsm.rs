//! Per-symbol position lifecycle as an explicit finite-state machine.
//!
//! Exactly one instance exists per symbol and its owning worker is the only
//! driver, so transitions for a symbol are strictly sequential — this is the
//! mechanism enforcing at-most-one-position-per-symbol.
//!
//! All time comparisons use event time, not wall clock, so a historical
//! replay reproduces live decisions exactly.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::models::{ClosedTrade, ExitReason, Position, PositionStatus, Side};

/// Lifecycle states. `Signaled` and `Exiting` are the in-flight order
/// states; shutdown waits for them to reach a terminal confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    /// No position, not in cooldown
    Idle,
    /// Signal accepted, entry order in flight
    Signaled,
    /// Entry filled, exits being monitored
    Open,
    /// Exit order in flight
    Exiting,
    /// Position closed, re-entry blocked until the cooldown expires
    Cooldown,
}

impl SymbolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolState::Idle => "IDLE",
            SymbolState::Signaled => "SIGNALED",
            SymbolState::Open => "OPEN",
            SymbolState::Exiting => "EXITING",
            SymbolState::Cooldown => "COOLDOWN",
        }
    }
}

pub struct PositionStateMachine {
    symbol: String,
    state: SymbolState,
    position: Option<Position>,
    cooldown_until: Option<DateTime<Utc>>,
    pending_exit: Option<ExitReason>,
}

impl PositionStateMachine {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: SymbolState::Idle,
            position: None,
            cooldown_until: None,
            pending_exit: None,
        }
    }

    pub fn state(&self) -> SymbolState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn position_mut(&mut self) -> Option<&mut Position> {
        self.position.as_mut()
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub fn pending_exit(&self) -> Option<ExitReason> {
        self.pending_exit
    }

    fn set_state(&mut self, new_state: SymbolState) {
        if self.state != new_state {
            debug!(
                symbol = %self.symbol,
                from = self.state.as_str(),
                to = new_state.as_str(),
                "state change"
            );
            self.state = new_state;
        }
    }

    /// Advance time-based transitions: COOLDOWN expires back to IDLE once
    /// event time passes the deadline.
    pub fn advance_time(&mut self, now: DateTime<Utc>) {
        if self.state == SymbolState::Cooldown {
            if let Some(until) = self.cooldown_until {
                if now >= until {
                    self.cooldown_until = None;
                    self.set_state(SymbolState::Idle);
                }
            }
        }
    }

    /// Whether a new entry may be attempted at `now`.
    pub fn can_enter(&mut self, now: DateTime<Utc>) -> bool {
        self.advance_time(now);
        self.state == SymbolState::Idle
    }

    /// IDLE -> SIGNALED: an admitted signal's entry order is being placed.
    pub fn begin_entry(&mut self) {
        if self.state != SymbolState::Idle {
            warn!(symbol = %self.symbol, state = self.state.as_str(), "invalid transition: begin_entry");
            return;
        }
        self.set_state(SymbolState::Signaled);
    }

    /// SIGNALED -> IDLE: the entry order failed or timed out. Fatal for this
    /// attempt only, not for the symbol.
    pub fn entry_failed(&mut self) {
        if self.state != SymbolState::Signaled {
            warn!(symbol = %self.symbol, state = self.state.as_str(), "invalid transition: entry_failed");
            return;
        }
        self.set_state(SymbolState::Idle);
    }

    /// SIGNALED -> OPEN: entry fill confirmed.
    pub fn entry_filled(&mut self, position: Position) {
        if self.state != SymbolState::Signaled {
            warn!(symbol = %self.symbol, state = self.state.as_str(), "invalid transition: entry_filled");
            return;
        }
        self.position = Some(position);
        self.set_state(SymbolState::Open);
    }

    /// Which protective level, if any, a price crossing triggers. Only
    /// meaningful while OPEN. A stop hit after the trailing ratchet armed is
    /// reported as a trailing exit.
    pub fn exit_trigger(&self, price: Decimal) -> Option<ExitReason> {
        if self.state != SymbolState::Open {
            return None;
        }
        let position = self.position.as_ref()?;

        let (tp_hit, sl_hit) = match position.side {
            Side::Buy => (price >= position.tp_price, price <= position.sl_price),
            Side::Sell => (price <= position.tp_price, price >= position.sl_price),
        };

        if tp_hit {
            Some(ExitReason::TakeProfit)
        } else if sl_hit {
            if position.trailing_armed {
                Some(ExitReason::TrailingStop)
            } else {
                Some(ExitReason::StopLoss)
            }
        } else {
            None
        }
    }

    /// OPEN -> EXITING: an exit order is being placed for `reason`.
    pub fn begin_exit(&mut self, reason: ExitReason) {
        if self.state != SymbolState::Open {
            warn!(symbol = %self.symbol, state = self.state.as_str(), "invalid transition: begin_exit");
            return;
        }
        if let Some(position) = self.position.as_mut() {
            position.status = PositionStatus::Exiting;
        }
        self.pending_exit = Some(reason);
        self.set_state(SymbolState::Exiting);
    }

    /// EXITING -> COOLDOWN: exit fill confirmed. Archives the position into
    /// a [`ClosedTrade`] and starts the cooldown from the fill's event time.
    pub fn exit_filled(
        &mut self,
        exit_price: Decimal,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<ClosedTrade> {
        if self.state != SymbolState::Exiting {
            warn!(symbol = %self.symbol, state = self.state.as_str(), "invalid transition: exit_filled");
            return None;
        }
        let position = self.position.take()?;
        let reason = self.pending_exit.take().unwrap_or(ExitReason::Forced);

        let closed = ClosedTrade::from_fill(&position, exit_price, now, reason);

        self.cooldown_until = Some(now + cooldown);
        self.set_state(SymbolState::Cooldown);
        Some(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::engine::risk::RiskManager;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn open_position(fsm: &mut PositionStateMachine, entry: Decimal) {
        let risk = RiskManager::new(RiskConfig::default());
        let (tp, sl) = risk.compute_exit_levels(entry, Side::Buy, dec!(0.004));

        fsm.begin_entry();
        fsm.entry_filled(Position {
            id: Uuid::new_v4().to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            entry_price: entry,
            quantity: dec!(0.002),
            tp_price: tp,
            sl_price: sl,
            trailing_anchor: None,
            trailing_armed: false,
            opened_at: t0(),
            status: PositionStatus::Open,
        });
    }

    #[test]
    fn test_happy_path_through_all_states() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        assert_eq!(fsm.state(), SymbolState::Idle);

        open_position(&mut fsm, dec!(50100));
        assert_eq!(fsm.state(), SymbolState::Open);

        fsm.begin_exit(ExitReason::TakeProfit);
        assert_eq!(fsm.state(), SymbolState::Exiting);
        assert_eq!(fsm.pending_exit(), Some(ExitReason::TakeProfit));

        let closed = fsm
            .exit_filled(dec!(50351), t0() + Duration::minutes(10), Duration::seconds(300))
            .unwrap();
        assert_eq!(fsm.state(), SymbolState::Cooldown);
        assert_eq!(closed.exit_reason, ExitReason::TakeProfit);
        assert!(closed.pnl > Decimal::ZERO);
    }

    /// Entry at 50100 with 0.5% TP puts the target at 50350.5; a tick at
    /// 50351 crosses it.
    #[test]
    fn test_take_profit_trigger() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        open_position(&mut fsm, dec!(50100));

        assert_eq!(fsm.exit_trigger(dec!(50200)), None);
        assert_eq!(fsm.exit_trigger(dec!(50351)), Some(ExitReason::TakeProfit));
    }

    /// Entry at 50100 with 0.4% SL puts the stop at 49899.6; a tick at 49899
    /// crosses it.
    #[test]
    fn test_stop_loss_trigger() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        open_position(&mut fsm, dec!(50100));

        assert_eq!(fsm.exit_trigger(dec!(49900)), None);
        assert_eq!(fsm.exit_trigger(dec!(49899)), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_armed_trailing_stop_reports_trailing_exit() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        open_position(&mut fsm, dec!(50100));

        let risk = RiskManager::new(RiskConfig::default());
        // Run price up past activation so the ratchet arms
        risk.update_trailing(fsm.position_mut().unwrap(), dec!(50300)).unwrap();
        let stop = fsm.position().unwrap().sl_price;

        assert_eq!(
            fsm.exit_trigger(stop - dec!(1)),
            Some(ExitReason::TrailingStop)
        );
    }

    #[test]
    fn test_entry_failure_reverts_to_idle() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        fsm.begin_entry();
        assert_eq!(fsm.state(), SymbolState::Signaled);

        fsm.entry_failed();
        assert_eq!(fsm.state(), SymbolState::Idle);
        assert!(fsm.position().is_none());

        // The symbol can try again immediately, no cooldown applies
        assert!(fsm.can_enter(t0()));
    }

    /// Position closes at T with a 300s cooldown: re-entry denied at T+100,
    /// allowed at T+301.
    #[test]
    fn test_cooldown_window() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        open_position(&mut fsm, dec!(50100));
        fsm.begin_exit(ExitReason::StopLoss);
        fsm.exit_filled(dec!(49899), t0(), Duration::seconds(300));

        assert!(!fsm.can_enter(t0() + Duration::seconds(100)));
        assert_eq!(fsm.state(), SymbolState::Cooldown);

        assert!(fsm.can_enter(t0() + Duration::seconds(301)));
        assert_eq!(fsm.state(), SymbolState::Idle);
    }

    #[test]
    fn test_invalid_transitions_ignored() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");

        // No position to exit from IDLE
        fsm.begin_exit(ExitReason::Forced);
        assert_eq!(fsm.state(), SymbolState::Idle);

        // Fill without a pending entry order
        fsm.entry_failed();
        assert_eq!(fsm.state(), SymbolState::Idle);

        assert!(fsm
            .exit_filled(dec!(50000), t0(), Duration::seconds(300))
            .is_none());
    }

    #[test]
    fn test_no_trigger_while_exiting() {
        let mut fsm = PositionStateMachine::new("BTCUSDT");
        open_position(&mut fsm, dec!(50100));
        fsm.begin_exit(ExitReason::TakeProfit);

        // Already exiting: further crossings must not re-trigger
        assert_eq!(fsm.exit_trigger(dec!(49000)), None);
    }
}
