//! Bot orchestrator: the scheduling layer between the market-event stream
//! and the per-symbol workers.
//!
//! Handles:
//! - Ranking refresh on snapshot events (throttled to the refresh interval)
//! - Spawning one worker task per ranked symbol
//! - Fanning out candles/ticks to the owning worker, in arrival order
//! - Flipping workers' admitted flags from ranked-set diffs
//! - Draining in-flight transitions on shutdown

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::db::TradeLog;
use crate::engine::arbiter::Arbiter;
use crate::engine::ranker::SymbolRanker;
use crate::engine::risk::RiskManager;
use crate::engine::worker::{SymbolWorker, WorkerEvent, WorkerReport};
use crate::exec::ExecutionClient;
use crate::feed::{MarketEvent, MarketSnapshot};

/// Channel depth per worker; the scheduler awaits sends, so a slow worker
/// backpressures its own symbol without reordering anything.
const WORKER_QUEUE: usize = 256;

struct WorkerHandle {
    tx: mpsc::Sender<WorkerEvent>,
    join: JoinHandle<WorkerReport>,
}

pub struct Bot<E, L> {
    config: Arc<AppConfig>,
    risk: Arc<RiskManager>,
    arbiter: Arc<Arbiter>,
    ranker: SymbolRanker,
    exec: Arc<E>,
    log: Arc<L>,

    workers: HashMap<String, WorkerHandle>,
    last_rank_at: Option<DateTime<Utc>>,
}

impl<E: ExecutionClient, L: TradeLog> Bot<E, L> {
    pub fn new(config: AppConfig, exec: Arc<E>, log: Arc<L>) -> Self {
        let config = Arc::new(config);
        let risk = Arc::new(RiskManager::new(config.risk.clone()));
        let arbiter = Arc::new(Arbiter::new(risk.clone()));
        let ranker = SymbolRanker::new(config.ranking.clone());

        Self {
            config,
            risk,
            arbiter,
            ranker,
            exec,
            log,
            workers: HashMap::new(),
            last_rank_at: None,
        }
    }

    /// Drive the engine until the event stream ends or ctrl-c, then drain
    /// workers and return their final reports.
    pub async fn run(&mut self, mut events: mpsc::Receiver<MarketEvent>) -> Result<Vec<WorkerReport>> {
        info!(
            top_n = self.config.ranking.top_n,
            max_positions = self.config.risk.max_total_positions,
            "engine started"
        );

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        info!("event stream ended");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Route one market event.
    pub async fn dispatch(&mut self, event: MarketEvent) {
        debug!(symbol = event.symbol().unwrap_or("*"), "market event");
        match event {
            MarketEvent::Snapshot { snapshot } => self.maybe_refresh_ranking(snapshot).await,
            MarketEvent::Candle { interval, candle } => {
                let symbol = candle.symbol.clone();
                self.forward(&symbol, WorkerEvent::Candle { interval, candle })
                    .await;
            }
            MarketEvent::Tick { tick } => {
                let symbol = tick.symbol.clone();
                self.forward(&symbol, WorkerEvent::Tick(tick)).await;
            }
            MarketEvent::ForceExit { symbol, timestamp } => {
                self.forward(&symbol, WorkerEvent::ForceExit { timestamp })
                    .await;
            }
        }
    }

    /// Send an event to the symbol's worker. Events for symbols that were
    /// never ranked have no worker and are dropped — ranking is the
    /// admission boundary for the whole pipeline.
    async fn forward(&mut self, symbol: &str, event: WorkerEvent) {
        let Some(handle) = self.workers.get(symbol) else {
            debug!(symbol, "dropping event for unranked symbol");
            return;
        };
        if handle.tx.send(event).await.is_err() {
            warn!(symbol, "worker channel closed unexpectedly");
            self.workers.remove(symbol);
        }
    }

    /// Recompute the ranked set if the refresh interval elapsed (event
    /// time). The new set wholesale-replaces the old one; the diff drives
    /// the workers' admitted flags.
    async fn maybe_refresh_ranking(&mut self, snapshot: MarketSnapshot) {
        if let Some(last) = self.last_rank_at {
            let elapsed = (snapshot.timestamp - last).num_seconds();
            if elapsed < self.config.ranking.refresh_interval_secs as i64 {
                debug!(elapsed, "snapshot within refresh interval, skipping");
                return;
            }
        }
        self.last_rank_at = Some(snapshot.timestamp);

        let entries = self.ranker.rank(&snapshot.tickers);
        info!(
            count = entries.len(),
            symbols = ?entries.iter().map(|e| e.symbol.as_str()).collect::<Vec<_>>(),
            "ranking refreshed"
        );

        let spreads: HashMap<String, Decimal> = entries
            .iter()
            .map(|e| (e.symbol.clone(), e.spread_pct))
            .collect();

        let symbols: Vec<String> = entries.iter().map(|e| e.symbol.clone()).collect();
        let diff = self.arbiter.replace_ranked(symbols.clone()).await;

        if !diff.added.is_empty() || !diff.removed.is_empty() {
            info!(added = ?diff.added, removed = ?diff.removed, "ranked set changed");
        }

        // Ranked symbols: ensure a worker exists and refresh its spread.
        for symbol in &symbols {
            self.ensure_worker(symbol);
            self.forward(
                symbol,
                WorkerEvent::Admission {
                    admitted: true,
                    spread_pct: spreads.get(symbol).copied(),
                },
            )
            .await;
        }

        // Removed symbols stop opening new positions; their workers stay
        // alive to run any open position to completion.
        for symbol in &diff.removed {
            self.forward(
                symbol,
                WorkerEvent::Admission {
                    admitted: false,
                    spread_pct: None,
                },
            )
            .await;
        }
    }

    fn ensure_worker(&mut self, symbol: &str) {
        if self.workers.contains_key(symbol) {
            return;
        }

        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        let worker = SymbolWorker::new(
            symbol,
            self.config.clone(),
            self.arbiter.clone(),
            self.risk.clone(),
            self.exec.clone(),
            self.log.clone(),
        );
        let join = tokio::spawn(worker.run(rx));

        debug!(symbol, "worker spawned");
        self.workers.insert(symbol.to_string(), WorkerHandle { tx, join });
    }

    /// Close all worker channels, let every worker drain its queue and
    /// finish any in-flight SIGNALED/EXITING transition, then join them.
    pub async fn shutdown(&mut self) -> Result<Vec<WorkerReport>> {
        let workers = std::mem::take(&mut self.workers);

        // Drop all senders first so the workers drain concurrently.
        let joins: Vec<_> = workers
            .into_iter()
            .map(|(symbol, handle)| {
                drop(handle.tx);
                async move { (symbol, handle.join.await) }
            })
            .collect();

        let mut reports = Vec::with_capacity(joins.len());
        for (symbol, result) in futures::future::join_all(joins).await {
            match result {
                Ok(report) => reports.push(report),
                Err(error) => warn!(symbol = %symbol, %error, "worker join failed"),
            }
        }

        let open = reports.iter().filter(|r| r.open_position.is_some()).count();
        info!(
            workers = reports.len(),
            open_positions = open,
            "engine stopped"
        );
        Ok(reports)
    }

    /// Current ranked-in status for a symbol (admission boundary).
    pub async fn is_ranked(&self, symbol: &str) -> bool {
        self.arbiter.is_ranked(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RiskConfig, StrategyConfig};
    use crate::db::NullTradeLog;
    use crate::exec::PaperExecution;
    use crate::models::{Candle, MarketTicker, PriceTick};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn test_config() -> AppConfig {
        AppConfig {
            strategy: StrategyConfig {
                ema_fast_period: 3,
                ema_slow_period: 5,
                volume_period: 4,
                atr_period: 3,
                ..StrategyConfig::default()
            },
            risk: RiskConfig {
                min_notional: dec!(1),
                ..RiskConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn make_ticker(symbol: &str) -> MarketTicker {
        MarketTicker {
            symbol: symbol.to_string(),
            last_price: dec!(100),
            quote_volume_24h: dec!(40000000),
            price_change_pct: 2.5,
            high_24h: dec!(110),
            low_24h: dec!(95),
            bid: dec!(99.99),
            ask: dec!(100.01),
        }
    }

    fn snapshot_event(symbols: &[&str], at: DateTime<Utc>) -> MarketEvent {
        MarketEvent::Snapshot {
            snapshot: MarketSnapshot {
                timestamp: at,
                tickers: symbols.iter().map(|s| make_ticker(s)).collect(),
            },
        }
    }

    fn candle_event(symbol: &str, interval: &str, minute: i64, close: Decimal, volume: Decimal) -> MarketEvent {
        MarketEvent::Candle {
            interval: interval.to_string(),
            candle: Candle {
                symbol: symbol.to_string(),
                open_time: t0() + Duration::minutes(minute),
                open: close - dec!(10),
                high: close + dec!(5),
                low: close - dec!(15),
                close,
                volume,
            },
        }
    }

    fn tick_event(symbol: &str, price: Decimal, minute: i64) -> MarketEvent {
        MarketEvent::Tick {
            tick: PriceTick {
                symbol: symbol.to_string(),
                price,
                timestamp: t0() + Duration::minutes(minute),
            },
        }
    }

    /// Snapshot, qualifying history, TP tick: the full pipeline, ending in
    /// one opened and closed position.
    fn full_cycle_events(symbol: &str) -> Vec<MarketEvent> {
        let mut events = vec![snapshot_event(&[symbol], t0())];
        for i in 0..8 {
            let close = dec!(100) + Decimal::from(i * 10);
            events.push(candle_event(symbol, "5m", i * 5, close, dec!(1000)));
        }
        for i in 0..8 {
            let close = dec!(100) + Decimal::from(i * 10);
            let volume = if i == 7 { dec!(2000) } else { dec!(1000) };
            events.push(candle_event(symbol, "1m", 40 + i, close, volume));
        }
        // Far above any computed TP level
        events.push(tick_event(symbol, dec!(200), 50));
        events
    }

    #[tokio::test]
    async fn test_pipeline_opens_and_closes_position() {
        let exec = Arc::new(PaperExecution::default());
        let mut bot = Bot::new(test_config(), exec.clone(), Arc::new(NullTradeLog));

        for event in full_cycle_events("BTCUSDT") {
            bot.dispatch(event).await;
        }
        let reports = bot.shutdown().await.unwrap();

        assert_eq!(exec.entries_filled(), 1);
        assert_eq!(exec.exits_filled(), 1);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].open_position.is_none());
    }

    #[tokio::test]
    async fn test_events_for_unranked_symbols_dropped() {
        let exec = Arc::new(PaperExecution::default());
        let mut bot = Bot::new(test_config(), exec.clone(), Arc::new(NullTradeLog));

        // No snapshot yet: nothing is ranked, candles go nowhere
        bot.dispatch(candle_event("BTCUSDT", "1m", 0, dec!(100), dec!(1000)))
            .await;
        bot.dispatch(tick_event("BTCUSDT", dec!(100), 1)).await;

        let reports = bot.shutdown().await.unwrap();
        assert!(reports.is_empty());
        assert_eq!(exec.entries_filled(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_within_interval_skipped() {
        let exec = Arc::new(PaperExecution::default());
        let mut bot = Bot::new(test_config(), exec.clone(), Arc::new(NullTradeLog));

        bot.dispatch(snapshot_event(&["AUSDT"], t0())).await;
        assert!(bot.is_ranked("AUSDT").await);

        // Second snapshot 60s later, interval is 900s: ignored wholesale
        bot.dispatch(snapshot_event(&["BUSDT"], t0() + Duration::seconds(60)))
            .await;
        assert!(bot.is_ranked("AUSDT").await);
        assert!(!bot.is_ranked("BUSDT").await);

        bot.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deranked_symbol_stops_entering() {
        let exec = Arc::new(PaperExecution::default());
        let mut bot = Bot::new(test_config(), exec.clone(), Arc::new(NullTradeLog));

        bot.dispatch(snapshot_event(&["BTCUSDT"], t0())).await;

        // Next refresh replaces the set; BTCUSDT is out
        bot.dispatch(snapshot_event(&["ETHUSDT"], t0() + Duration::seconds(1000)))
            .await;
        assert!(!bot.is_ranked("BTCUSDT").await);

        // Qualifying history arrives for the de-ranked symbol: no entry
        for event in full_cycle_events("BTCUSDT").into_iter().skip(1) {
            bot.dispatch(event).await;
        }
        bot.shutdown().await.unwrap();

        assert_eq!(exec.entries_filled(), 0);
    }

    /// Identical event sequences through fresh engines make identical
    /// decisions.
    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let exec = Arc::new(PaperExecution::default());
            let mut bot = Bot::new(test_config(), exec.clone(), Arc::new(NullTradeLog));
            for event in full_cycle_events("BTCUSDT") {
                bot.dispatch(event).await;
            }
            let reports = bot.shutdown().await.unwrap();
            outcomes.push((
                exec.entries_filled(),
                exec.exits_filled(),
                reports.len(),
                reports[0].open_position.is_some(),
            ));
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }
}
