//! scalpbot — short-horizon crypto scalping engine.
//!
//! Ranks liquid, volatile pairs on a refresh interval, evaluates a
//! two-timeframe EMA/volume/breakout entry rule, and runs one position
//! state machine per symbol under global risk caps.

mod bot;
mod config;
mod db;
mod engine;
mod error;
mod exec;
mod feed;
mod models;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::Bot;
use crate::config::AppConfig;
use crate::db::{Database, TradeLog};
use crate::exec::PaperExecution;
use crate::feed::{MarketSnapshot, ReplayFeed};

/// scalpbot CLI.
#[derive(Parser)]
#[command(name = "scalpbot")]
#[command(about = "Short-horizon crypto scalping engine", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a historical event file through the engine (simulated fills)
    Replay {
        /// JSON-lines market event file, in chronological order
        #[arg(short, long)]
        events: PathBuf,

        /// Skip the database, discard signal/trade records
        #[arg(long)]
        no_db: bool,

        /// Simulated adverse fill slippage, as a fraction (0.0002 = 2 bps)
        #[arg(long, default_value = "0")]
        slippage: Decimal,
    },

    /// Rank a market snapshot file and print the eligible top-N
    Scan {
        /// JSON file containing a market snapshot
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Print the effective configuration
    Config,

    /// Show recorded trades and aggregate statistics
    History {
        /// Number of trades to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Invalid or contradictory configuration is fatal here, before any
    // event loop starts.
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Replay {
            events,
            no_db,
            slippage,
        } => {
            let exec = Arc::new(PaperExecution::new(slippage));

            if no_db {
                run_replay(config, events, exec, Arc::new(db::NullTradeLog), None).await?;
            } else {
                let database = Arc::new(Database::new(&config.database_url).await?);
                run_replay(config, events, exec, database.clone(), Some(database)).await?;
            }
        }

        Commands::Scan { snapshot } => {
            let contents = std::fs::read_to_string(&snapshot)
                .with_context(|| format!("failed to read {}", snapshot.display()))?;
            let snapshot: MarketSnapshot =
                serde_json::from_str(&contents).context("failed to parse market snapshot")?;

            let ranker = engine::ranker::SymbolRanker::new(config.ranking.clone());
            let ranked = ranker.rank(&snapshot.tickers);

            if ranked.is_empty() {
                println!("No symbols passed the eligibility filters.");
                return Ok(());
            }

            println!(
                "\n{:<12} {:>8} {:>16} {:>10} {:>8} {:>8}",
                "SYMBOL", "SCORE", "VOLUME 24H", "SPREAD%", "VOL%", "CHG%"
            );
            println!("{}", "-".repeat(68));
            for entry in ranked {
                println!(
                    "{:<12} {:>8.3} {:>16.0} {:>10.4} {:>8.2} {:>8.2}",
                    entry.symbol,
                    entry.score,
                    entry.volume_24h,
                    entry.spread_pct * Decimal::from(100),
                    entry.volatility_pct,
                    entry.daily_change_pct
                );
            }
        }

        Commands::Config => {
            println!("\n=== Strategy ===");
            println!("EMA periods:          {} / {}", config.strategy.ema_fast_period, config.strategy.ema_slow_period);
            println!("Timeframes:           {} (entry) / {} (trend)", config.strategy.timeframe_entry, config.strategy.timeframe_trend);
            println!("Volume period:        {}", config.strategy.volume_period);
            println!("ATR period:           {}", config.strategy.atr_period);
            println!("Max spread:           {}%", config.strategy.max_spread_pct * Decimal::from(100));

            println!("\n=== Ranking ===");
            println!("Top N:                {}", config.ranking.top_n);
            println!("Refresh interval:     {}s", config.ranking.refresh_interval_secs);
            println!("Min 24h volume:       {}", config.ranking.min_volume_24h);
            println!("Min volatility:       {}%", config.ranking.min_volatility_pct);
            println!("Min daily change:     {}%", config.ranking.min_daily_change_pct);
            println!("Excluded symbols:     {}", config.ranking.excluded_symbols.join(", "));

            println!("\n=== Risk ===");
            println!("Take profit:          {}%", config.risk.take_profit_pct * Decimal::from(100));
            println!("Stop loss:            {}%", config.risk.stop_loss_pct * Decimal::from(100));
            println!("Trailing activation:  {}%", config.risk.trailing_activation_pct * Decimal::from(100));
            println!("Trailing step:        {}%", config.risk.trailing_step_pct * Decimal::from(100));
            println!("Max positions:        {} total / {} per symbol", config.risk.max_total_positions, config.risk.max_positions_per_symbol);
            println!("Cooldown:             {}s", config.risk.cooldown_secs);
            println!("Capital per trade:    {}%", config.risk.capital_per_trade_pct * Decimal::from(100));
            println!("Loss streak limit:    {}", config.risk.loss_streak_limit);

            println!("\n=== Execution ===");
            println!("Entry timeout:        {}s", config.exec.entry_timeout_secs);
            println!("Exit retry limit:     {}", config.exec.exit_retry_limit);
            println!("Starting capital:     {}", config.starting_capital);
        }

        Commands::History { limit } => {
            let database = Database::new(&config.database_url).await?;

            let trades = database.get_recent_trades(limit).await?;
            if trades.is_empty() {
                println!("No trades recorded yet. Run 'scalpbot replay' first.");
                return Ok(());
            }

            println!(
                "\n{:<12} {:<6} {:>12} {:>12} {:>10} {:>8} {:>8} {:<14}",
                "SYMBOL", "SIDE", "ENTRY", "EXIT", "PNL", "PNL%", "HELD", "REASON"
            );
            println!("{}", "-".repeat(90));
            for trade in &trades {
                println!(
                    "{:<12} {:<6} {:>12.4} {:>12.4} {:>10.4} {:>7.2}% {:>7}s {:<14}",
                    trade.symbol,
                    trade.side,
                    trade.entry_price,
                    trade.exit_price,
                    trade.pnl,
                    trade.pnl_pct * 100.0,
                    trade.duration_seconds,
                    trade.exit_reason
                );
            }

            let stats = database.get_statistics().await?;
            let (signals_total, signals_executed) = database.get_signal_counts().await?;

            println!("\n=== Statistics ===");
            println!("Total trades:    {}", stats.total_trades);
            println!("Winning trades:  {}", stats.winning_trades);
            println!("Losing trades:   {}", stats.losing_trades);
            println!("Win rate:        {:.1}%", stats.win_rate * 100.0);
            println!("Total PnL:       {:.4}", stats.total_pnl);
            println!("Avg PnL:         {:.3}%", stats.avg_pnl_pct * 100.0);
            println!("Sharpe (trade):  {:.2}", stats.sharpe_ratio);
            println!("Signals:         {} ({} executed)", signals_total, signals_executed);
        }
    }

    Ok(())
}

/// Wire the replay feed into the engine and run it to completion.
async fn run_replay<L: TradeLog>(
    config: AppConfig,
    events: PathBuf,
    exec: Arc<PaperExecution>,
    log: Arc<L>,
    database: Option<Arc<Database>>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(1024);
    let feed = ReplayFeed::new(events);
    let feed_task = tokio::spawn(feed.run(tx));

    let mut bot = Bot::new(config, exec.clone(), log);
    let reports = bot.run(rx).await?;

    let delivered = feed_task.await??;
    info!(events = delivered, "replay finished");

    println!("\n=== Replay Summary ===");
    println!("Events replayed:  {}", delivered);
    println!("Entries filled:   {}", exec.entries_filled());
    println!("Exits filled:     {}", exec.exits_filled());

    let open: Vec<_> = reports
        .iter()
        .filter_map(|r| r.open_position.as_ref())
        .collect();
    if !open.is_empty() {
        println!("\nPositions still open at end of replay:");
        for position in open {
            println!(
                "  {} {} {} @ {}",
                position.symbol,
                position.side.as_str(),
                position.quantity,
                position.entry_price
            );
        }
    }

    if let Some(database) = database {
        let stats = database.get_statistics().await?;
        if stats.total_trades > 0 {
            println!("\nClosed trades:    {}", stats.total_trades);
            println!("Win rate:         {:.1}%", stats.win_rate * 100.0);
            println!("Total PnL:        {:.4}", stats.total_pnl);
        }
    }

    Ok(())
}
