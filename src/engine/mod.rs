//! The decision-and-lifecycle engine: indicators, entry rule, ranking,
//! risk, per-symbol state machines, and the coordinating arbiter.

pub mod arbiter;
pub mod evaluator;
pub mod fsm;
pub mod indicators;
pub mod ranker;
pub mod risk;
pub mod worker;
