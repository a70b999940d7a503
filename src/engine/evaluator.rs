//! Entry rule: two-timeframe EMA alignment + breakout + volume + spread.
//!
//! Pure — no mutation, no memory of past signals. At most one signal per
//! closed entry candle; every condition is re-evaluated from scratch each
//! time.

use rust_decimal::Decimal;

use crate::config::StrategyConfig;
use crate::models::{Candle, Side, Signal, SignalFeatures};

use super::indicators::IndicatorSnapshot;

pub struct SignalEvaluator;

impl SignalEvaluator {
    /// Evaluate the entry rule on a freshly closed entry-timeframe candle.
    ///
    /// All five conditions must hold (plain conjunction, no ordering
    /// dependency):
    /// 1. trend timeframe: fast EMA above slow EMA and rising
    /// 2. entry timeframe: fast EMA above slow EMA and rising
    /// 3. breakout: close above the previous candle's high
    /// 4. volume above the trailing average
    /// 5. spread within the configured maximum
    ///
    /// The breakout rule is long-only, so any emitted signal has side BUY.
    pub fn evaluate(
        config: &StrategyConfig,
        last: &Candle,
        prev: &Candle,
        entry: &IndicatorSnapshot,
        trend: &IndicatorSnapshot,
        spread_pct: Decimal,
    ) -> Option<Signal> {
        let trend_aligned = trend.ema_fast > trend.ema_slow && trend.fast_rising();
        let entry_aligned = entry.ema_fast > entry.ema_slow && entry.fast_rising();
        let breakout = last.close > prev.high;
        let volume_ok = last.volume > entry.avg_volume;
        let spread_ok = spread_pct <= config.max_spread_pct;

        if !(trend_aligned && entry_aligned && breakout && volume_ok && spread_ok) {
            return None;
        }

        Some(Signal {
            symbol: last.symbol.clone(),
            side: Side::Buy,
            price: last.close,
            timestamp: last.open_time,
            features: SignalFeatures {
                ema_fast: entry.ema_fast,
                ema_slow: entry.ema_slow,
                volume: last.volume,
                avg_volume: entry.avg_volume,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn make_candle(close: Decimal, high: Decimal, volume: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            open: close - dec!(20),
            high,
            low: close - dec!(50),
            close,
            volume,
        }
    }

    fn make_snapshot(fast: Decimal, slow: Decimal, fast_prev: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_fast: fast,
            ema_slow: slow,
            ema_fast_prev: fast_prev,
            avg_volume: dec!(1200),
            atr_pct: dec!(0.004),
        }
    }

    /// Aligned rising EMAs on both timeframes, breakout close, volume above
    /// average, tight spread: a BUY signal at the close.
    #[test]
    fn test_all_conditions_met_emits_buy() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        let signal =
            SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005))
                .expect("signal expected");

        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.price, dec!(50100));
        assert_eq!(signal.features.volume, dec!(1500));
        assert_eq!(signal.features.avg_volume, dec!(1200));
    }

    /// Same setup but volume below the trailing average: no signal.
    #[test]
    fn test_low_volume_blocks_signal() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1000));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        let signal =
            SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005));
        assert!(signal.is_none());
    }

    #[test]
    fn test_flat_trend_ema_blocks_signal() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        // Fast above slow but not rising (strict comparison)
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50100));

        let signal =
            SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005));
        assert!(signal.is_none());
    }

    #[test]
    fn test_close_at_prev_high_is_no_breakout() {
        let config = StrategyConfig::default();
        // Close exactly equal to the previous high: strict > fails
        let last = make_candle(dec!(50080), dec!(50100), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        let signal =
            SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005));
        assert!(signal.is_none());
    }

    #[test]
    fn test_wide_spread_blocks_signal() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        // 0.2% spread against the default 0.1% maximum
        let signal =
            SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.002));
        assert!(signal.is_none());
    }

    #[test]
    fn test_spread_at_limit_passes() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        let signal = SignalEvaluator::evaluate(
            &config,
            &last,
            &prev,
            &entry,
            &trend,
            config.max_spread_pct,
        );
        assert!(signal.is_some());
    }

    #[test]
    fn test_deterministic_repeat_evaluation() {
        let config = StrategyConfig::default();
        let last = make_candle(dec!(50100), dec!(50120), dec!(1500));
        let prev = make_candle(dec!(50060), dec!(50080), dec!(1100));
        let entry = make_snapshot(dec!(50050), dec!(49980), dec!(50020));
        let trend = make_snapshot(dec!(50100), dec!(49950), dec!(50070));

        let a = SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005));
        let b = SignalEvaluator::evaluate(&config, &last, &prev, &entry, &trend, dec!(0.0005));
        assert_eq!(a.is_some(), b.is_some());
        assert_eq!(a.unwrap().price, b.unwrap().price);
    }
}
