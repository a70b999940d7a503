//! Per-symbol worker: the single driver of one symbol's state machine.
//!
//! Each worker owns its candle history and FSM and consumes events from a
//! bounded channel in arrival order, so transitions for a symbol are
//! strictly sequential. Cross-symbol coordination happens only through the
//! arbiter. When the channel closes the worker drains what is queued,
//! finishes any in-flight transition, and returns a final report.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use backoff::ExponentialBackoff;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::TradeLog;
use crate::error::{AdmissionFault, DataFault, ExecError};
use crate::exec::ExecutionClient;
use crate::models::{Candle, ExitReason, Position, PositionStatus, PriceTick, Signal};

use super::arbiter::Arbiter;
use super::evaluator::SignalEvaluator;
use super::fsm::{PositionStateMachine, SymbolState};
use super::indicators::IndicatorEngine;
use super::risk::RiskManager;

/// Events routed to a worker by the scheduler.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Candle { interval: String, candle: Candle },
    Tick(PriceTick),
    /// Ranking refresh outcome for this symbol: whether it may open new
    /// positions, and its latest spread when ranked
    Admission {
        admitted: bool,
        spread_pct: Option<Decimal>,
    },
    /// Operator-requested close of the open position
    ForceExit { timestamp: DateTime<Utc> },
}

/// Final state returned when a worker stops.
#[derive(Debug)]
pub struct WorkerReport {
    pub symbol: String,
    pub final_state: SymbolState,
    pub open_position: Option<Position>,
}

pub struct SymbolWorker<E, L> {
    symbol: String,
    config: Arc<AppConfig>,
    indicators: IndicatorEngine,
    fsm: PositionStateMachine,
    arbiter: Arc<Arbiter>,
    risk: Arc<RiskManager>,
    exec: Arc<E>,
    log: Arc<L>,

    entry_candles: VecDeque<Candle>,
    trend_candles: VecDeque<Candle>,
    history_limit: usize,

    admitted: bool,
    spread_pct: Option<Decimal>,
    last_price: Option<Decimal>,
}

impl<E: ExecutionClient, L: TradeLog> SymbolWorker<E, L> {
    pub fn new(
        symbol: impl Into<String>,
        config: Arc<AppConfig>,
        arbiter: Arc<Arbiter>,
        risk: Arc<RiskManager>,
        exec: Arc<E>,
        log: Arc<L>,
    ) -> Self {
        let symbol = symbol.into();
        let indicators = IndicatorEngine::new(&config.strategy);
        let history_limit = indicators.min_candles() + 50;

        Self {
            fsm: PositionStateMachine::new(symbol.clone()),
            symbol,
            config,
            indicators,
            arbiter,
            risk,
            exec,
            log,
            entry_candles: VecDeque::new(),
            trend_candles: VecDeque::new(),
            history_limit,
            admitted: false,
            spread_pct: None,
            last_price: None,
        }
    }

    pub fn state(&self) -> SymbolState {
        self.fsm.state()
    }

    pub fn position(&self) -> Option<&Position> {
        self.fsm.position()
    }

    /// Consume events until the channel closes, then report.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerEvent>) -> WorkerReport {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }

        debug!(symbol = %self.symbol, state = self.fsm.state().as_str(), "worker drained");
        WorkerReport {
            symbol: self.symbol.clone(),
            final_state: self.fsm.state(),
            open_position: self.fsm.position().cloned(),
        }
    }

    /// Process one event. Events for a symbol are handled one at a time, in
    /// arrival order.
    pub async fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Candle { interval, candle } => self.on_candle(&interval, candle).await,
            WorkerEvent::Tick(tick) => self.on_tick(tick).await,
            WorkerEvent::Admission {
                admitted,
                spread_pct,
            } => self.on_admission(admitted, spread_pct),
            WorkerEvent::ForceExit { timestamp } => self.on_force_exit(timestamp).await,
        }
    }

    fn on_admission(&mut self, admitted: bool, spread_pct: Option<Decimal>) {
        if self.admitted && !admitted {
            info!(
                symbol = %self.symbol,
                open = self.fsm.position().is_some(),
                "de-ranked: no new entries, open position runs to completion"
            );
        }
        self.admitted = admitted;
        if spread_pct.is_some() {
            self.spread_pct = spread_pct;
        }
    }

    async fn on_candle(&mut self, interval: &str, candle: Candle) {
        let is_entry = interval == self.config.strategy.timeframe_entry;
        let is_trend = interval == self.config.strategy.timeframe_trend;
        if !is_entry && !is_trend {
            debug!(symbol = %self.symbol, interval, "ignoring candle for unused interval");
            return;
        }

        let history = if is_entry {
            &mut self.entry_candles
        } else {
            &mut self.trend_candles
        };

        // Candle timestamps per symbol must be non-decreasing; anything else
        // is stale data to be discarded.
        if let Some(last) = history.back() {
            if candle.open_time <= last.open_time {
                let fault = DataFault::StaleCandle {
                    symbol: self.symbol.clone(),
                    interval: interval.to_string(),
                };
                debug!(%fault, open_time = %candle.open_time, "discarding candle");
                return;
            }
        }

        history.push_back(candle.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }

        if !is_entry {
            return;
        }

        let now = candle.open_time;
        self.fsm.advance_time(now);

        // A closed candle is also a price observation for open positions.
        self.check_exits(candle.close, now).await;

        self.evaluate_entry(now).await;
    }

    async fn on_tick(&mut self, tick: PriceTick) {
        if tick.symbol != self.symbol {
            return;
        }
        self.last_price = Some(tick.price);
        self.fsm.advance_time(tick.timestamp);
        self.check_exits(tick.price, tick.timestamp).await;
    }

    async fn on_force_exit(&mut self, timestamp: DateTime<Utc>) {
        match self.fsm.state() {
            SymbolState::Open => {
                let price = self
                    .last_price
                    .or_else(|| self.fsm.position().map(|p| p.entry_price));
                if let Some(price) = price {
                    info!(symbol = %self.symbol, "forced close requested");
                    self.fsm.begin_exit(ExitReason::Forced);
                    self.execute_exit(price, timestamp).await;
                }
            }
            SymbolState::Exiting => {
                if let Some(price) = self.last_price {
                    self.execute_exit(price, timestamp).await;
                }
            }
            _ => debug!(symbol = %self.symbol, "forced close ignored: no open position"),
        }
    }

    // ==================== Entry path ====================

    async fn evaluate_entry(&mut self, now: DateTime<Utc>) {
        if !self.admitted {
            return;
        }

        // Idle evaluates and may trade; cooldown still evaluates so the
        // dropped signal lands in the log, everything else is busy with a
        // live order or open position.
        let ready = self.fsm.can_enter(now);
        if !ready && self.fsm.state() != SymbolState::Cooldown {
            return;
        }

        let Some(spread_pct) = self.spread_pct else {
            let fault = DataFault::NoSpread {
                symbol: self.symbol.clone(),
            };
            debug!(%fault, "skipping evaluation");
            return;
        };
        if self.entry_candles.len() < 2 {
            return;
        }

        let entry_window: Vec<Candle> = self.entry_candles.iter().cloned().collect();
        let trend_window: Vec<Candle> = self.trend_candles.iter().cloned().collect();

        let entry_snapshot = match self.indicators.compute(&entry_window) {
            Ok(snapshot) => snapshot,
            Err(fault) => {
                debug!(symbol = %self.symbol, %fault, "entry timeframe not ready");
                return;
            }
        };
        let trend_snapshot = match self.indicators.compute(&trend_window) {
            Ok(snapshot) => snapshot,
            Err(fault) => {
                debug!(symbol = %self.symbol, %fault, "trend timeframe not ready");
                return;
            }
        };

        let last = &entry_window[entry_window.len() - 1];
        let prev = &entry_window[entry_window.len() - 2];

        let Some(signal) = SignalEvaluator::evaluate(
            &self.config.strategy,
            last,
            prev,
            &entry_snapshot,
            &trend_snapshot,
            spread_pct,
        ) else {
            return;
        };

        info!(
            symbol = %self.symbol,
            price = %signal.price,
            volume = %signal.features.volume,
            avg_volume = %signal.features.avg_volume,
            "entry signal"
        );

        if !ready {
            // A qualifying signal during cooldown is dropped, not deferred.
            let until = self.fsm.cooldown_until().unwrap_or(now);
            let fault = AdmissionFault::InCooldown { until };
            info!(symbol = %self.symbol, reason = %fault, "signal dropped");
            self.record_signal(&signal, false, Some(&fault.to_string()))
                .await;
            return;
        }

        self.attempt_entry(signal, entry_snapshot.atr_pct).await;
    }

    async fn attempt_entry(&mut self, signal: Signal, atr_pct: Decimal) {
        // Admission and slot reservation are atomic inside the arbiter.
        if let Err(fault) = self.arbiter.try_admit(&self.symbol).await {
            info!(symbol = %self.symbol, reason = %fault, "signal dropped");
            self.record_signal(&signal, false, Some(&fault.to_string()))
                .await;
            return;
        }

        let quantity = self
            .risk
            .compute_size(self.config.starting_capital, signal.price);
        if quantity.is_zero() {
            info!(symbol = %self.symbol, price = %signal.price, "size below tradable minimum");
            self.arbiter.release(&self.symbol).await;
            self.record_signal(&signal, false, Some("size below tradable minimum"))
                .await;
            return;
        }

        self.fsm.begin_entry();

        let entry_timeout = StdDuration::from_secs(self.config.exec.entry_timeout_secs);
        let placed = timeout(
            entry_timeout,
            self.exec
                .place_entry(&self.symbol, signal.side, quantity, signal.price),
        )
        .await;

        match placed {
            Ok(Ok(fill)) => {
                let (tp_price, sl_price) =
                    self.risk
                        .compute_exit_levels(fill.price, signal.side, atr_pct);

                let position = Position {
                    id: Uuid::new_v4().to_string(),
                    symbol: self.symbol.clone(),
                    side: signal.side,
                    entry_price: fill.price,
                    quantity: fill.quantity,
                    tp_price,
                    sl_price,
                    trailing_anchor: None,
                    trailing_armed: false,
                    opened_at: signal.timestamp,
                    status: PositionStatus::Open,
                };

                info!(
                    symbol = %self.symbol,
                    entry = %fill.price,
                    quantity = %fill.quantity,
                    tp = %tp_price,
                    sl = %sl_price,
                    "position opened"
                );
                self.fsm.entry_filled(position);
                self.record_signal(&signal, true, None).await;
            }
            Ok(Err(error)) => {
                warn!(symbol = %self.symbol, %error, "entry order failed, reverting");
                self.fsm.entry_failed();
                self.arbiter.release(&self.symbol).await;
                self.record_signal(&signal, false, Some(&error.to_string()))
                    .await;
            }
            Err(_) => {
                let error = ExecError::Timeout;
                warn!(symbol = %self.symbol, %error, "entry order timed out, reverting");
                self.fsm.entry_failed();
                self.arbiter.release(&self.symbol).await;
                self.record_signal(&signal, false, Some(&error.to_string()))
                    .await;
            }
        }
    }

    // ==================== Exit path ====================

    async fn check_exits(&mut self, price: Decimal, now: DateTime<Utc>) {
        match self.fsm.state() {
            SymbolState::Open => {
                if let Some(position) = self.fsm.position_mut() {
                    if let Some(new_stop) = self.risk.update_trailing(position, price) {
                        debug!(symbol = %self.symbol, stop = %new_stop, "trailing stop tightened");
                    }
                }

                if let Some(reason) = self.fsm.exit_trigger(price) {
                    info!(
                        symbol = %self.symbol,
                        price = %price,
                        reason = reason.as_str(),
                        "exit triggered"
                    );
                    self.fsm.begin_exit(reason);
                    self.execute_exit(price, now).await;
                }
            }
            // An earlier exit burst failed; re-arm on this price event.
            SymbolState::Exiting => self.execute_exit(price, now).await,
            _ => {}
        }
    }

    /// Place the exit order with bounded exponential backoff. Exhausted
    /// retries are escalated, not swallowed: the position stays EXITING and
    /// the next price event re-arms the attempt.
    async fn execute_exit(&mut self, price: Decimal, now: DateTime<Utc>) {
        let Some(position) = self.fsm.position().cloned() else {
            return;
        };

        let base = self.config.exec.exit_backoff_base_ms;
        let retry_limit = self.config.exec.exit_retry_limit;
        let policy = ExponentialBackoff {
            initial_interval: StdDuration::from_millis(base),
            max_elapsed_time: Some(StdDuration::from_millis(base << retry_limit)),
            ..ExponentialBackoff::default()
        };

        let exec = self.exec.clone();
        let symbol = self.symbol.clone();
        let result = backoff::future::retry(policy, || {
            let exec = exec.clone();
            let position = position.clone();
            let symbol = symbol.clone();
            async move {
                exec.place_exit(&position, price).await.map_err(|error| {
                    warn!(symbol = %symbol, %error, "exit attempt failed, backing off");
                    backoff::Error::transient(error)
                })
            }
        })
        .await;

        match result {
            Ok(fill) => {
                let cooldown = Duration::seconds(self.config.risk.cooldown_secs);
                if let Some(closed) = self.fsm.exit_filled(fill.price, now, cooldown) {
                    self.arbiter.record_close(&self.symbol, closed.pnl).await;
                    info!(
                        symbol = %self.symbol,
                        exit = %fill.price,
                        pnl = %closed.pnl,
                        pnl_pct = %closed.pnl_pct,
                        reason = closed.exit_reason.as_str(),
                        "position closed"
                    );
                    if let Err(error) = self.log.record_trade(&closed).await {
                        warn!(symbol = %self.symbol, %error, "trade log write failed");
                    }
                }
            }
            Err(error) => {
                // An unexitable open position is the one critical condition.
                error!(
                    symbol = %self.symbol,
                    %error,
                    retries = retry_limit,
                    "exit retries exhausted; position remains open, will re-arm on next price"
                );
            }
        }
    }

    async fn record_signal(&self, signal: &Signal, executed: bool, reason: Option<&str>) {
        if let Err(error) = self.log.record_signal(signal, executed, reason).await {
            warn!(symbol = %self.symbol, %error, "signal log write failed");
        }
    }
}
