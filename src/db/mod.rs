//! Trade log persistence: every signal (executed or not) and every closed
//! position, for analysis only.
//!
//! The engine never consults this store for decisions and never depends on
//! its durability for correctness — write failures are logged and swallowed
//! by the caller.

use std::future::Future;

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use statrs::statistics::Statistics;

use crate::models::{ClosedTrade, Signal};

/// Persistence collaborator contract.
pub trait TradeLog: Send + Sync + 'static {
    /// Record a signal and whether it turned into an entry; denied signals
    /// carry the denial reason.
    fn record_signal(
        &self,
        signal: &Signal,
        executed: bool,
        reject_reason: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Record a closed position.
    fn record_trade(&self, trade: &ClosedTrade) -> impl Future<Output = Result<()>> + Send;
}

/// Discards everything. Used in tests and when running without a database.
pub struct NullTradeLog;

impl TradeLog for NullTradeLog {
    async fn record_signal(
        &self,
        _signal: &Signal,
        _executed: bool,
        _reject_reason: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn record_trade(&self, _trade: &ClosedTrade) -> Result<()> {
        Ok(())
    }
}

/// SQLite-backed trade log.
pub struct Database {
    pool: SqlitePool,
}

/// Stored closed-trade record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub position_id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub opened_at: String,
    pub closed_at: String,
    pub duration_seconds: i64,
    pub exit_reason: String,
}

/// Aggregate performance over all recorded trades.
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl_pct: f64,
    /// Mean per-trade return over its standard deviation
    pub sharpe_ratio: f64,
}

impl Database {
    /// Open (or create) the database and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        // Closed trades
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                quantity REAL NOT NULL,
                pnl REAL NOT NULL,
                pnl_pct REAL NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                exit_reason TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Signals, including the ones that never traded
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                ema_fast REAL,
                ema_slow REAL,
                volume REAL,
                volume_avg REAL,
                executed INTEGER NOT NULL DEFAULT 0,
                reject_reason TEXT,
                signal_time TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_closed_at ON trades(closed_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_symbol ON signals(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Most recent closed trades, newest first.
    pub async fn get_recent_trades(&self, limit: i64) -> Result<Vec<StoredTrade>> {
        let trades = sqlx::query_as::<_, StoredTrade>(
            "SELECT id, position_id, symbol, side, entry_price, exit_price, quantity,
                    pnl, pnl_pct, opened_at, closed_at, duration_seconds, exit_reason
             FROM trades ORDER BY closed_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(trades)
    }

    /// Count of recorded signals (total, executed).
    pub async fn get_signal_counts(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(executed), 0) FROM signals",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Aggregate statistics over all recorded trades.
    pub async fn get_statistics(&self) -> Result<TradeStats> {
        let rows: Vec<(f64, f64)> = sqlx::query_as("SELECT pnl, pnl_pct FROM trades")
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(TradeStats::default());
        }

        let pnls: Vec<f64> = rows.iter().map(|(pnl, _)| *pnl).collect();
        let returns: Vec<f64> = rows.iter().map(|(_, pct)| *pct).collect();

        let winning = pnls.iter().filter(|&&p| p > 0.0).count() as i64;
        let total = pnls.len() as i64;

        let mean_return = returns.iter().copied().sum::<f64>() / returns.len() as f64;
        let std_dev = returns.clone().std_dev();
        let sharpe_ratio = if std_dev > 0.0 && std_dev.is_finite() {
            mean_return / std_dev
        } else {
            0.0
        };

        Ok(TradeStats {
            total_trades: total,
            winning_trades: winning,
            losing_trades: total - winning,
            win_rate: winning as f64 / total as f64,
            total_pnl: pnls.iter().sum(),
            avg_pnl_pct: mean_return,
            sharpe_ratio,
        })
    }
}

impl TradeLog for Database {
    async fn record_signal(
        &self,
        signal: &Signal,
        executed: bool,
        reject_reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (symbol, side, price, ema_fast, ema_slow, volume, volume_avg,
                                 executed, reject_reason, signal_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.symbol)
        .bind(signal.side.as_str())
        .bind(signal.price.to_f64().unwrap_or(0.0))
        .bind(signal.features.ema_fast.to_f64())
        .bind(signal.features.ema_slow.to_f64())
        .bind(signal.features.volume.to_f64())
        .bind(signal.features.avg_volume.to_f64())
        .bind(executed)
        .bind(reject_reason)
        .bind(signal.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_trade(&self, trade: &ClosedTrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (position_id, symbol, side, entry_price, exit_price, quantity,
                                pnl, pnl_pct, opened_at, closed_at, duration_seconds, exit_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.position_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry_price.to_f64().unwrap_or(0.0))
        .bind(trade.exit_price.to_f64().unwrap_or(0.0))
        .bind(trade.quantity.to_f64().unwrap_or(0.0))
        .bind(trade.pnl.to_f64().unwrap_or(0.0))
        .bind(trade.pnl_pct.to_f64().unwrap_or(0.0))
        .bind(trade.opened_at.to_rfc3339())
        .bind(trade.closed_at.to_rfc3339())
        .bind(trade.duration_secs())
        .bind(trade.exit_reason.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side, SignalFeatures};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    // A file-backed database per test: a plain :memory: URL would give every
    // pool connection its own empty database.
    async fn memory_db() -> Database {
        let path = std::env::temp_dir().join(format!("scalpbot-test-{}.db", uuid::Uuid::new_v4()));
        Database::new(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .unwrap()
    }

    fn make_signal() -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: dec!(50100),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            features: SignalFeatures {
                ema_fast: dec!(50050),
                ema_slow: dec!(49980),
                volume: dec!(1500),
                avg_volume: dec!(1200),
            },
        }
    }

    fn make_trade(symbol: &str, pnl: rust_decimal::Decimal, pnl_pct: rust_decimal::Decimal) -> ClosedTrade {
        let opened = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        ClosedTrade {
            position_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: Side::Buy,
            entry_price: dec!(50100),
            exit_price: dec!(50350),
            quantity: dec!(0.002),
            pnl,
            pnl_pct,
            opened_at: opened,
            closed_at: opened + Duration::minutes(7),
            exit_reason: ExitReason::TakeProfit,
        }
    }

    #[tokio::test]
    async fn test_signal_round_trip() {
        let db = memory_db().await;
        db.record_signal(&make_signal(), true, None).await.unwrap();
        db.record_signal(&make_signal(), false, Some("global position cap reached: 3/3"))
            .await
            .unwrap();

        let (total, executed) = db.get_signal_counts().await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(executed, 1);
    }

    #[tokio::test]
    async fn test_trade_round_trip_and_stats() {
        let db = memory_db().await;
        db.record_trade(&make_trade("BTCUSDT", dec!(0.5), dec!(0.005)))
            .await
            .unwrap();
        db.record_trade(&make_trade("ETHUSDT", dec!(-0.4), dec!(-0.004)))
            .await
            .unwrap();
        db.record_trade(&make_trade("BTCUSDT", dec!(0.5), dec!(0.005)))
            .await
            .unwrap();

        let trades = db.get_recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].exit_reason, "TAKE_PROFIT");
        assert_eq!(trades[0].duration_seconds, 420);
        assert!(trades[0].id > 0);
        assert!(!trades[0].position_id.is_empty());
        assert!(trades[0].opened_at.starts_with("2024-06-01"));
        assert!(trades[0].closed_at.starts_with("2024-06-01"));
        assert!((trades[0].quantity - 0.002).abs() < 1e-12);

        let stats = db.get_statistics().await.unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_pnl - 0.6).abs() < 1e-9);
        assert!(stats.sharpe_ratio > 0.0);
    }

    #[tokio::test]
    async fn test_empty_stats() {
        let db = memory_db().await;
        let stats = db.get_statistics().await.unwrap();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
    }
}
