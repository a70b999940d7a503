//! Rolling technical features computed from a candle window.
//!
//! Pure: every call derives the snapshot from the input window alone, so
//! identical history always yields identical output.

use rust_decimal::Decimal;

use crate::config::StrategyConfig;
use crate::error::DataFault;
use crate::models::Candle;

/// Features derived from the last N closed candles. Ephemeral — recomputed
/// per closed candle, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,

    /// Fast EMA one candle earlier, for the slope check
    pub ema_fast_prev: Decimal,

    /// Mean volume over the volume window
    pub avg_volume: Decimal,

    /// Mean true range over the ATR window as a fraction of the last close
    pub atr_pct: Decimal,
}

impl IndicatorSnapshot {
    /// Strict slope-up: the fast EMA rose on the last candle.
    pub fn fast_rising(&self) -> bool {
        self.ema_fast > self.ema_fast_prev
    }
}

/// Computes indicator snapshots for one symbol/timeframe.
pub struct IndicatorEngine {
    ema_fast_period: usize,
    ema_slow_period: usize,
    volume_period: usize,
    atr_period: usize,
}

impl IndicatorEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            ema_fast_period: config.ema_fast_period,
            ema_slow_period: config.ema_slow_period,
            volume_period: config.volume_period,
            atr_period: config.atr_period,
        }
    }

    /// Candles required before a snapshot can be computed. The +1 terms give
    /// the fast EMA a previous value for the slope check and the ATR a prior
    /// close for the first true range.
    pub fn min_candles(&self) -> usize {
        (self.ema_slow_period + 1)
            .max(self.volume_period)
            .max(self.atr_period + 1)
    }

    /// Compute a snapshot from an ordered window of closed candles (oldest
    /// first). Fails with `InsufficientHistory` until enough candles exist.
    pub fn compute(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, DataFault> {
        let need = self.min_candles();
        if candles.len() < need {
            return Err(DataFault::InsufficientHistory {
                have: candles.len(),
                need,
            });
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();

        let (ema_fast_prev, ema_fast) = ema_last_two(&closes, self.ema_fast_period);
        let (_, ema_slow) = ema_last_two(&closes, self.ema_slow_period);

        let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
        let avg_volume = mean(&volumes[volumes.len() - self.volume_period..]);

        let atr_pct = self.atr_pct(candles);

        Ok(IndicatorSnapshot {
            ema_fast,
            ema_slow,
            ema_fast_prev,
            avg_volume,
            atr_pct,
        })
    }

    /// Mean true range over the ATR window, relative to the last close.
    fn atr_pct(&self, candles: &[Candle]) -> Decimal {
        let start = candles.len() - self.atr_period;
        let mut sum = Decimal::ZERO;
        for i in start..candles.len() {
            sum += candles[i].true_range(candles[i - 1].close);
        }
        let atr = sum / Decimal::from(self.atr_period);

        let last_close = candles[candles.len() - 1].close;
        if last_close.is_zero() {
            return Decimal::ZERO;
        }
        atr / last_close
    }
}

/// Last two values of the recursive EMA over `closes`, seeded from the
/// simple average of the first `period` closes:
/// `ema_t = close_t * k + ema_{t-1} * (1-k)`, `k = 2/(period+1)`.
fn ema_last_two(closes: &[Decimal], period: usize) -> (Decimal, Decimal) {
    let k = Decimal::from(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let mut ema = mean(&closes[..period]);
    let mut prev = ema;

    for close in &closes[period..] {
        prev = ema;
        ema = *close * k + ema * one_minus_k;
    }

    (prev, ema)
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}
