//! Simulated execution: fills at the reference price plus slippage.
//!
//! Used by the replay runner and the engine tests. Failures can be scripted
//! to exercise the SIGNALED -> IDLE revert and the exit retry path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::ExecError;
use crate::models::{Position, Side};

use super::{ExecutionClient, FillReport};

pub struct PaperExecution {
    /// Adverse fill slippage as a fraction of the reference price
    slippage_pct: Decimal,

    /// Failures returned (in order) before fills resume, entries first
    scripted_entry_failures: Mutex<VecDeque<ExecError>>,
    scripted_exit_failures: Mutex<VecDeque<ExecError>>,

    entries_filled: AtomicUsize,
    exits_filled: AtomicUsize,
}

impl PaperExecution {
    pub fn new(slippage_pct: Decimal) -> Self {
        Self {
            slippage_pct,
            scripted_entry_failures: Mutex::new(VecDeque::new()),
            scripted_exit_failures: Mutex::new(VecDeque::new()),
            entries_filled: AtomicUsize::new(0),
            exits_filled: AtomicUsize::new(0),
        }
    }

    /// Queue a failure for the next entry order.
    pub fn fail_next_entry(&self, error: ExecError) {
        self.scripted_entry_failures.lock().unwrap().push_back(error);
    }

    /// Queue a failure for the next exit order.
    pub fn fail_next_exit(&self, error: ExecError) {
        self.scripted_exit_failures.lock().unwrap().push_back(error);
    }

    pub fn entries_filled(&self) -> usize {
        self.entries_filled.load(Ordering::SeqCst)
    }

    pub fn exits_filled(&self) -> usize {
        self.exits_filled.load(Ordering::SeqCst)
    }

    /// Fill price with adverse slippage: buys pay up, sells receive less.
    fn fill_price(&self, side: Side, reference_price: Decimal) -> Decimal {
        match side {
            Side::Buy => reference_price * (Decimal::ONE + self.slippage_pct),
            Side::Sell => reference_price * (Decimal::ONE - self.slippage_pct),
        }
    }
}

impl Default for PaperExecution {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

impl ExecutionClient for PaperExecution {
    async fn place_entry(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Result<FillReport, ExecError> {
        if let Some(error) = self.scripted_entry_failures.lock().unwrap().pop_front() {
            debug!(symbol, "scripted entry failure");
            return Err(error);
        }

        self.entries_filled.fetch_add(1, Ordering::SeqCst);
        Ok(FillReport {
            price: self.fill_price(side, reference_price),
            quantity,
        })
    }

    async fn place_exit(
        &self,
        position: &Position,
        reference_price: Decimal,
    ) -> Result<FillReport, ExecError> {
        if let Some(error) = self.scripted_exit_failures.lock().unwrap().pop_front() {
            debug!(symbol = %position.symbol, "scripted exit failure");
            return Err(error);
        }

        self.exits_filled.fetch_add(1, Ordering::SeqCst);
        Ok(FillReport {
            price: self.fill_price(position.side.closing(), reference_price),
            quantity: position.quantity,
        })
    }
}
