//! Risk layer: concurrency caps, protective exit levels, the trailing-stop
//! ratchet, and position sizing under lot-size constraints.

use rust_decimal::Decimal;

use crate::config::RiskConfig;
use crate::error::AdmissionFault;
use crate::models::{Position, Side};

pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // ==================== Admission ====================

    /// Approve or deny an entry attempt against the concurrency caps and the
    /// symbol's loss streak. Pure policy — the arbiter supplies the counters
    /// under its lock so the check is atomic with the reservation.
    pub fn approve_entry(
        &self,
        open_total: usize,
        open_for_symbol: usize,
        loss_streak: u32,
    ) -> Result<(), AdmissionFault> {
        if open_total >= self.config.max_total_positions {
            return Err(AdmissionFault::GlobalCapReached {
                open: open_total,
                max: self.config.max_total_positions,
            });
        }
        if open_for_symbol >= self.config.max_positions_per_symbol {
            return Err(AdmissionFault::SymbolCapReached {
                open: open_for_symbol,
                max: self.config.max_positions_per_symbol,
            });
        }
        if loss_streak >= self.config.loss_streak_limit {
            return Err(AdmissionFault::LossStreak {
                streak: loss_streak,
                limit: self.config.loss_streak_limit,
            });
        }
        Ok(())
    }

    // ==================== Exit levels ====================

    /// Compute take-profit and stop-loss prices for a fill. Both distances
    /// are widened by their configured increments when volatility (ATR%)
    /// exceeds the threshold — wider targets in volatile regimes.
    pub fn compute_exit_levels(
        &self,
        entry_price: Decimal,
        side: Side,
        atr_pct: Decimal,
    ) -> (Decimal, Decimal) {
        let mut tp_pct = self.config.take_profit_pct;
        let mut sl_pct = self.config.stop_loss_pct;

        if atr_pct > self.config.atr_widen_threshold {
            tp_pct += self.config.tp_widen_pct;
            sl_pct += self.config.sl_widen_pct;
        }

        match side {
            Side::Buy => (
                entry_price * (Decimal::ONE + tp_pct),
                entry_price * (Decimal::ONE - sl_pct),
            ),
            Side::Sell => (
                entry_price * (Decimal::ONE - tp_pct),
                entry_price * (Decimal::ONE + sl_pct),
            ),
        }
    }

    // ==================== Trailing stop ====================

    /// Ratchet the trailing stop. Once unrealized gain reaches the
    /// activation threshold the stop follows the favorable extreme at the
    /// configured step, monotonically tightening — it never loosens.
    ///
    /// Returns the new stop when it moved.
    pub fn update_trailing(&self, position: &mut Position, price: Decimal) -> Option<Decimal> {
        let activated = position.trailing_anchor.is_some()
            || position.unrealized_pct(price) >= self.config.trailing_activation_pct;
        if !activated {
            return None;
        }

        let anchor = match position.side {
            Side::Buy => position.trailing_anchor.map_or(price, |a| a.max(price)),
            Side::Sell => position.trailing_anchor.map_or(price, |a| a.min(price)),
        };
        position.trailing_anchor = Some(anchor);

        let candidate = match position.side {
            Side::Buy => anchor * (Decimal::ONE - self.config.trailing_step_pct),
            Side::Sell => anchor * (Decimal::ONE + self.config.trailing_step_pct),
        };

        let tightens = match position.side {
            Side::Buy => candidate > position.sl_price,
            Side::Sell => candidate < position.sl_price,
        };
        if !tightens {
            return None;
        }

        position.sl_price = candidate;
        position.trailing_armed = true;
        Some(candidate)
    }

    // ==================== Sizing ====================

    /// Quantity for a new position: `(capital × capital_per_trade) / price`,
    /// rounded down to the quantity step. Returns zero when the result falls
    /// below the minimum quantity or minimum notional — too small to trade.
    pub fn compute_size(&self, capital: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let notional = capital * self.config.capital_per_trade_pct;
        let mut quantity = notional / price;

        if self.config.quantity_step > Decimal::ZERO {
            quantity = (quantity / self.config.quantity_step).floor() * self.config.quantity_step;
        }

        if quantity < self.config.min_quantity {
            return Decimal::ZERO;
        }
        if quantity * price < self.config.min_notional {
            return Decimal::ZERO;
        }

        quantity
    }
}
