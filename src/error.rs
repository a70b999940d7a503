//! Fault taxonomy for the engine.
//!
//! Three runtime classes, each handled differently:
//! - [`DataFault`] — evaluation is skipped until fresh data arrives
//! - [`AdmissionFault`] — the signal is dropped with a logged reason
//! - [`ExecError`] — entry attempts revert, exit attempts are retried
//!
//! Configuration faults are fatal at startup and use `anyhow` directly in
//! [`crate::config`].

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Missing or unusable market data. Never retried; the next fresh event
/// resumes evaluation naturally.
#[derive(Debug, Error, PartialEq)]
pub enum DataFault {
    #[error("insufficient candle history: have {have}, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("stale {interval} candle for {symbol}: open time regressed")]
    StaleCandle { symbol: String, interval: String },

    #[error("no spread data for {symbol} yet")]
    NoSpread { symbol: String },
}

/// A signal that qualified on indicators but is not allowed to trade.
#[derive(Debug, Error, PartialEq)]
pub enum AdmissionFault {
    #[error("global position cap reached: {open}/{max}")]
    GlobalCapReached { open: usize, max: usize },

    #[error("per-symbol position cap reached: {open}/{max}")]
    SymbolCapReached { open: usize, max: usize },

    #[error("symbol not in current ranking")]
    NotRanked,

    #[error("symbol in cooldown until {until}")]
    InCooldown { until: DateTime<Utc> },

    #[error("loss streak {streak} at limit {limit}")]
    LossStreak { streak: u32, limit: u32 },
}

/// Order placement failure reported by the execution collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("order confirmation timed out")]
    Timeout,
}
