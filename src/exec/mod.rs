//! Execution collaborator contract.
//!
//! The engine never assumes an instantaneous fill: every entry passes
//! through SIGNALED and every exit through EXITING while one of these calls
//! is in flight.

mod paper;

pub use paper::PaperExecution;

use std::future::Future;

use rust_decimal::Decimal;

use crate::error::ExecError;
use crate::models::{Position, Side};

/// A confirmed fill: the price and quantity actually executed.
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order placement surface the engine drives. `reference_price` is the
/// engine's view of the current price; simulated implementations fill
/// against it, live ones ignore it.
pub trait ExecutionClient: Send + Sync + 'static {
    /// Place the entry order for an admitted signal.
    fn place_entry(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> impl Future<Output = Result<FillReport, ExecError>> + Send;

    /// Place the order closing `position`.
    fn place_exit(
        &self,
        position: &Position,
        reference_price: Decimal,
    ) -> impl Future<Output = Result<FillReport, ExecError>> + Send;
}
