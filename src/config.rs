//! Centralised configuration: strategy, ranking, risk, and execution knobs.
//!
//! Loaded once at startup from the environment (after dotenv), then validated.
//! A contradictory risk configuration is fatal — the engine refuses to start
//! rather than trade with it. Every module borrows the relevant section.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;

/// Signal-evaluation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fast EMA period (candles)
    pub ema_fast_period: usize,

    /// Slow EMA period (candles)
    pub ema_slow_period: usize,

    /// Window for the trailing volume average (candles)
    pub volume_period: usize,

    /// Window for the ATR volatility measure (candles)
    pub atr_period: usize,

    /// Candle interval signals are evaluated on, e.g. "1m"
    pub timeframe_entry: String,

    /// Candle interval the trend filter runs on, e.g. "5m"
    pub timeframe_trend: String,

    /// Maximum bid/ask spread fraction tolerated at entry (0.001 = 0.1%)
    pub max_spread_pct: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast_period: 9,
            ema_slow_period: 21,
            volume_period: 20,
            atr_period: 14,
            timeframe_entry: "1m".to_string(),
            timeframe_trend: "5m".to_string(),
            max_spread_pct: dec!(0.001),
        }
    }
}

/// Symbol eligibility filters and ranking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Number of symbols admitted for trading
    pub top_n: usize,

    /// Minimum seconds between ranked-set recomputations
    pub refresh_interval_secs: u64,

    /// Minimum 24h quote volume
    pub min_volume_24h: Decimal,

    /// Minimum last price (filters dust pairs)
    pub min_price: Decimal,

    /// Maximum spread fraction for eligibility
    pub max_spread_pct: Decimal,

    /// Minimum 24h range volatility in percent
    pub min_volatility_pct: f64,

    /// Minimum absolute 24h price change in percent
    pub min_daily_change_pct: f64,

    /// Symbols never traded (stablecoin pairs etc.)
    pub excluded_symbols: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            refresh_interval_secs: 900, // 15 minutes
            min_volume_24h: dec!(30000000),
            min_price: dec!(0.01),
            max_spread_pct: dec!(0.001),
            min_volatility_pct: 0.3,
            min_daily_change_pct: 1.5,
            excluded_symbols: vec![
                "USDCUSDT".to_string(),
                "BUSDUSDT".to_string(),
                "TUSDUSDT".to_string(),
                "USDPUSDT".to_string(),
                "FDUSDUSDT".to_string(),
            ],
        }
    }
}

/// Position sizing, protective levels, and concurrency caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Take-profit distance as a fraction of entry (0.005 = 0.5%)
    pub take_profit_pct: Decimal,

    /// Stop-loss distance as a fraction of entry
    pub stop_loss_pct: Decimal,

    /// ATR% above which TP/SL are widened
    pub atr_widen_threshold: Decimal,

    /// TP widening increment in volatile regimes
    pub tp_widen_pct: Decimal,

    /// SL widening increment in volatile regimes
    pub sl_widen_pct: Decimal,

    /// Unrealized gain fraction that activates the trailing stop
    pub trailing_activation_pct: Decimal,

    /// Retrace fraction from the favorable extreme that the stop trails by
    pub trailing_step_pct: Decimal,

    /// Global cap on concurrently open positions
    pub max_total_positions: usize,

    /// Cap on concurrently open positions per symbol
    pub max_positions_per_symbol: usize,

    /// Quiet period after a position closes before the symbol may re-enter
    pub cooldown_secs: i64,

    /// Fraction of capital committed per trade
    pub capital_per_trade_pct: Decimal,

    /// Consecutive losing trades on a symbol before entries are blocked
    pub loss_streak_limit: u32,

    /// Smallest tradable base-asset quantity
    pub min_quantity: Decimal,

    /// Quantity granularity; computed sizes are rounded down to a multiple
    pub quantity_step: Decimal,

    /// Smallest tradable order value in the quote asset
    pub min_notional: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: dec!(0.005),  // 0.5%
            stop_loss_pct: dec!(0.004),    // 0.4%
            atr_widen_threshold: dec!(0.01),
            tp_widen_pct: dec!(0.002),
            sl_widen_pct: dec!(0.001),
            trailing_activation_pct: dec!(0.003),
            trailing_step_pct: dec!(0.001),
            max_total_positions: 3,
            max_positions_per_symbol: 1,
            cooldown_secs: 300, // 5 minutes
            capital_per_trade_pct: dec!(0.10),
            loss_streak_limit: 3,
            min_quantity: dec!(0.0001),
            quantity_step: dec!(0.0001),
            min_notional: dec!(10),
        }
    }
}

/// Order execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Seconds an entry order may wait for confirmation before the attempt
    /// reverts
    pub entry_timeout_secs: u64,

    /// Exit attempts per trigger before escalating
    pub exit_retry_limit: u32,

    /// Initial backoff between exit retries, in milliseconds
    pub exit_backoff_base_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            entry_timeout_secs: 5,
            exit_retry_limit: 3,
            exit_backoff_base_ms: 250,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    pub ranking: RankingConfig,
    pub risk: RiskConfig,
    pub exec: ExecConfig,

    /// Account equity the sizing layer draws from
    pub starting_capital: Decimal,

    /// SQLite URL for the trade log
    pub database_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            ranking: RankingConfig::default(),
            risk: RiskConfig::default(),
            exec: ExecConfig::default(),
            starting_capital: dec!(1000),
            database_url: "sqlite:./scalpbot.db?mode=rwc".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv), then
    /// validate. Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // missing .env is fine

        let defaults = Self::default();

        let excluded_symbols = match env::var("EXCLUDED_SYMBOLS") {
            Ok(v) => v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.ranking.excluded_symbols.clone(),
        };

        let config = Self {
            strategy: StrategyConfig {
                ema_fast_period: parse_env("EMA_FAST", defaults.strategy.ema_fast_period)?,
                ema_slow_period: parse_env("EMA_SLOW", defaults.strategy.ema_slow_period)?,
                volume_period: parse_env("VOLUME_PERIOD", defaults.strategy.volume_period)?,
                atr_period: parse_env("ATR_PERIOD", defaults.strategy.atr_period)?,
                timeframe_entry: env::var("TIMEFRAME_ENTRY")
                    .unwrap_or_else(|_| defaults.strategy.timeframe_entry.clone()),
                timeframe_trend: env::var("TIMEFRAME_TREND")
                    .unwrap_or_else(|_| defaults.strategy.timeframe_trend.clone()),
                max_spread_pct: parse_env("MAX_SPREAD_PCT", defaults.strategy.max_spread_pct)?,
            },
            ranking: RankingConfig {
                top_n: parse_env("TOP_N", defaults.ranking.top_n)?,
                refresh_interval_secs: parse_env(
                    "RANK_REFRESH_INTERVAL_SECS",
                    defaults.ranking.refresh_interval_secs,
                )?,
                min_volume_24h: parse_env("MIN_VOLUME_24H", defaults.ranking.min_volume_24h)?,
                min_price: parse_env("MIN_PRICE", defaults.ranking.min_price)?,
                max_spread_pct: parse_env(
                    "RANK_MAX_SPREAD_PCT",
                    defaults.ranking.max_spread_pct,
                )?,
                min_volatility_pct: parse_env(
                    "MIN_VOLATILITY_PCT",
                    defaults.ranking.min_volatility_pct,
                )?,
                min_daily_change_pct: parse_env(
                    "MIN_DAILY_CHANGE_PCT",
                    defaults.ranking.min_daily_change_pct,
                )?,
                excluded_symbols,
            },
            risk: RiskConfig {
                take_profit_pct: parse_env("TAKE_PROFIT_PCT", defaults.risk.take_profit_pct)?,
                stop_loss_pct: parse_env("STOP_LOSS_PCT", defaults.risk.stop_loss_pct)?,
                atr_widen_threshold: parse_env(
                    "ATR_WIDEN_THRESHOLD",
                    defaults.risk.atr_widen_threshold,
                )?,
                tp_widen_pct: parse_env("TP_WIDEN_PCT", defaults.risk.tp_widen_pct)?,
                sl_widen_pct: parse_env("SL_WIDEN_PCT", defaults.risk.sl_widen_pct)?,
                trailing_activation_pct: parse_env(
                    "TRAILING_ACTIVATION_PCT",
                    defaults.risk.trailing_activation_pct,
                )?,
                trailing_step_pct: parse_env(
                    "TRAILING_STEP_PCT",
                    defaults.risk.trailing_step_pct,
                )?,
                max_total_positions: parse_env(
                    "MAX_TOTAL_POSITIONS",
                    defaults.risk.max_total_positions,
                )?,
                max_positions_per_symbol: parse_env(
                    "MAX_POSITIONS_PER_PAIR",
                    defaults.risk.max_positions_per_symbol,
                )?,
                cooldown_secs: parse_env("COOLDOWN_SECS", defaults.risk.cooldown_secs)?,
                capital_per_trade_pct: parse_env(
                    "CAPITAL_PER_TRADE",
                    defaults.risk.capital_per_trade_pct,
                )?,
                loss_streak_limit: parse_env("LOSS_STREAK_LIMIT", defaults.risk.loss_streak_limit)?,
                min_quantity: parse_env("MIN_QTY", defaults.risk.min_quantity)?,
                quantity_step: parse_env("QTY_STEP", defaults.risk.quantity_step)?,
                min_notional: parse_env("MIN_NOTIONAL", defaults.risk.min_notional)?,
            },
            exec: ExecConfig {
                entry_timeout_secs: parse_env(
                    "ENTRY_TIMEOUT_SECS",
                    defaults.exec.entry_timeout_secs,
                )?,
                exit_retry_limit: parse_env("EXIT_RETRY_LIMIT", defaults.exec.exit_retry_limit)?,
                exit_backoff_base_ms: parse_env(
                    "EXIT_BACKOFF_BASE_MS",
                    defaults.exec.exit_backoff_base_ms,
                )?,
            },
            starting_capital: parse_env("STARTING_CAPITAL", defaults.starting_capital)?,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject invalid or contradictory parameters before any event loop
    /// starts. All violations here are fatal.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if s.ema_fast_period == 0 || s.ema_slow_period == 0 {
            bail!("EMA periods must be positive");
        }
        if s.ema_fast_period >= s.ema_slow_period {
            bail!(
                "EMA_FAST ({}) must be shorter than EMA_SLOW ({})",
                s.ema_fast_period,
                s.ema_slow_period
            );
        }
        if s.volume_period == 0 || s.atr_period == 0 {
            bail!("VOLUME_PERIOD and ATR_PERIOD must be positive");
        }
        if s.timeframe_entry.is_empty() || s.timeframe_trend.is_empty() {
            bail!("entry and trend timeframes must be set");
        }
        if s.max_spread_pct <= Decimal::ZERO {
            bail!("MAX_SPREAD_PCT must be positive");
        }

        let r = &self.ranking;
        if r.top_n == 0 {
            bail!("TOP_N must be at least 1");
        }
        if r.min_volume_24h < Decimal::ZERO || r.min_price < Decimal::ZERO {
            bail!("ranking volume/price floors must not be negative");
        }
        if r.min_volatility_pct < 0.0 || r.min_daily_change_pct < 0.0 {
            bail!("ranking volatility/change floors must not be negative");
        }

        let k = &self.risk;
        if k.take_profit_pct <= Decimal::ZERO || k.take_profit_pct >= Decimal::ONE {
            bail!("TAKE_PROFIT_PCT must be a fraction in (0, 1)");
        }
        if k.stop_loss_pct <= Decimal::ZERO || k.stop_loss_pct >= Decimal::ONE {
            bail!("STOP_LOSS_PCT must be a fraction in (0, 1)");
        }
        if k.stop_loss_pct >= k.take_profit_pct {
            bail!(
                "STOP_LOSS_PCT ({}) must be tighter than TAKE_PROFIT_PCT ({})",
                k.stop_loss_pct,
                k.take_profit_pct
            );
        }
        if k.trailing_activation_pct <= Decimal::ZERO || k.trailing_step_pct <= Decimal::ZERO {
            bail!("trailing activation and step must be positive");
        }
        if k.trailing_step_pct >= k.trailing_activation_pct {
            bail!(
                "TRAILING_STEP_PCT ({}) must be smaller than TRAILING_ACTIVATION_PCT ({})",
                k.trailing_step_pct,
                k.trailing_activation_pct
            );
        }
        if k.max_total_positions == 0 || k.max_positions_per_symbol == 0 {
            bail!("position caps must be at least 1");
        }
        if k.max_positions_per_symbol > k.max_total_positions {
            bail!(
                "MAX_POSITIONS_PER_PAIR ({}) exceeds MAX_TOTAL_POSITIONS ({})",
                k.max_positions_per_symbol,
                k.max_total_positions
            );
        }
        if k.cooldown_secs < 0 {
            bail!("COOLDOWN_SECS must not be negative");
        }
        if k.capital_per_trade_pct <= Decimal::ZERO || k.capital_per_trade_pct > Decimal::ONE {
            bail!("CAPITAL_PER_TRADE must be a fraction in (0, 1]");
        }
        if k.min_quantity < Decimal::ZERO
            || k.quantity_step < Decimal::ZERO
            || k.min_notional < Decimal::ZERO
        {
            bail!("lot-size constraints must not be negative");
        }

        if self.exec.entry_timeout_secs == 0 {
            bail!("ENTRY_TIMEOUT_SECS must be at least 1");
        }
        if self.exec.exit_retry_limit == 0 {
            bail!("EXIT_RETRY_LIMIT must be at least 1");
        }

        if self.starting_capital <= Decimal::ZERO {
            bail!("STARTING_CAPITAL must be positive");
        }

        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_stop_loss_wider_than_take_profit_is_fatal() {
        let mut config = AppConfig::default();
        config.risk.stop_loss_pct = dec!(0.01);
        config.risk.take_profit_pct = dec!(0.005);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fast_ema_must_be_shorter() {
        let mut config = AppConfig::default();
        config.strategy.ema_fast_period = 21;
        config.strategy.ema_slow_period = 21;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trailing_step_must_be_below_activation() {
        let mut config = AppConfig::default();
        config.risk.trailing_step_pct = config.risk.trailing_activation_pct;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_caps_rejected() {
        let mut config = AppConfig::default();
        config.risk.max_total_positions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_symbol_cap_cannot_exceed_global() {
        let mut config = AppConfig::default();
        config.risk.max_positions_per_symbol = 5;
        config.risk.max_total_positions = 3;
        assert!(config.validate().is_err());
    }
}
