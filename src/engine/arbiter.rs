//! The single coordinating arbiter for shared global state.
//!
//! Open-position slots (global and per-symbol), the current ranked set, and
//! per-symbol loss streaks live here, behind one mutex. Admission checks and
//! slot reservation happen under the same lock, so two near-simultaneous
//! signals for different symbols can never both slip past the global cap.
//!
//! A slot is reserved when a signal is admitted (SIGNALED), released when the
//! entry fails, and returned with the loss-streak update when the position
//! closes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AdmissionFault;

use super::risk::RiskManager;

/// Additions and removals between two consecutive ranked sets.
#[derive(Debug, Default)]
pub struct RankDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Default)]
struct ArbiterState {
    open_by_symbol: HashMap<String, usize>,
    open_total: usize,
    ranked: HashSet<String>,
    loss_streaks: HashMap<String, u32>,
}

pub struct Arbiter {
    risk: Arc<RiskManager>,
    state: Mutex<ArbiterState>,
}

impl Arbiter {
    pub fn new(risk: Arc<RiskManager>) -> Self {
        Self {
            risk,
            state: Mutex::new(ArbiterState::default()),
        }
    }

    /// Atomically check admission and reserve a position slot. The caller
    /// must pair every success with [`release`](Self::release) (entry
    /// failure) or [`record_close`](Self::record_close) (position closed).
    pub async fn try_admit(&self, symbol: &str) -> Result<(), AdmissionFault> {
        let mut state = self.state.lock().await;

        if !state.ranked.contains(symbol) {
            return Err(AdmissionFault::NotRanked);
        }

        let open_for_symbol = state.open_by_symbol.get(symbol).copied().unwrap_or(0);
        let loss_streak = state.loss_streaks.get(symbol).copied().unwrap_or(0);
        self.risk
            .approve_entry(state.open_total, open_for_symbol, loss_streak)?;

        *state.open_by_symbol.entry(symbol.to_string()).or_insert(0) += 1;
        state.open_total += 1;
        debug!(symbol, open_total = state.open_total, "slot reserved");
        Ok(())
    }

    /// Release a reserved slot after a failed entry. No position existed, so
    /// the loss streak is untouched.
    pub async fn release(&self, symbol: &str) {
        let mut state = self.state.lock().await;
        Self::free_slot(&mut state, symbol);
        debug!(symbol, open_total = state.open_total, "slot released");
    }

    /// Return the slot of a closed position and update the symbol's
    /// consecutive-loss streak: losses extend it, a win resets it.
    pub async fn record_close(&self, symbol: &str, pnl: Decimal) {
        let mut state = self.state.lock().await;
        Self::free_slot(&mut state, symbol);

        if pnl < Decimal::ZERO {
            let streak = state.loss_streaks.entry(symbol.to_string()).or_insert(0);
            *streak += 1;
            debug!(symbol, streak = *streak, "loss streak extended");
        } else {
            state.loss_streaks.remove(symbol);
        }
    }

    fn free_slot(state: &mut ArbiterState, symbol: &str) {
        match state.open_by_symbol.get_mut(symbol) {
            Some(count) if *count > 0 => {
                *count -= 1;
                state.open_total -= 1;
            }
            _ => warn!(symbol, "slot release without reservation"),
        }
    }

    /// Wholesale-replace the ranked set and report the diff so the scheduler
    /// can flip workers' admitted flags. Open positions on removed symbols
    /// are unaffected; they just stop opening new ones.
    pub async fn replace_ranked(&self, symbols: Vec<String>) -> RankDiff {
        let new_set: HashSet<String> = symbols.into_iter().collect();
        let mut state = self.state.lock().await;

        let mut added: Vec<String> = new_set.difference(&state.ranked).cloned().collect();
        let mut removed: Vec<String> = state.ranked.difference(&new_set).cloned().collect();
        added.sort();
        removed.sort();

        state.ranked = new_set;
        RankDiff { added, removed }
    }

    pub async fn is_ranked(&self, symbol: &str) -> bool {
        self.state.lock().await.ranked.contains(symbol)
    }

    pub async fn open_total(&self) -> usize {
        self.state.lock().await.open_total
    }

    pub async fn open_for_symbol(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .await
            .open_by_symbol
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }
}
