//! Symbol eligibility filtering and top-N ranking.
//!
//! Runs on a fixed refresh interval; every run scores the whole market
//! snapshot from scratch and the result REPLACES the previous ranked set.
//! Consumers diff old vs new to find additions and removals.

use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RankingConfig;
use crate::models::{MarketTicker, RankingEntry};

/// Bounded normalizers so no single metric dominates the score.
const VOLUME_NORM: f64 = 1e9;
const PCT_NORM: f64 = 5.0;
const SPREAD_NORM: f64 = 0.001;

pub struct SymbolRanker {
    config: RankingConfig,
}

impl SymbolRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Filter and score a market-wide snapshot into the ordered top-N list.
    /// Idempotent: an unchanged snapshot yields an identical list.
    pub fn rank(&self, tickers: &[MarketTicker]) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = tickers
            .iter()
            .filter_map(|ticker| self.evaluate(ticker))
            .collect();

        // Highest score first; ties broken by symbol name for determinism.
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        entries.truncate(self.config.top_n);
        entries
    }

    /// Apply the eligibility filters and score one ticker.
    fn evaluate(&self, ticker: &MarketTicker) -> Option<RankingEntry> {
        if self.config.excluded_symbols.contains(&ticker.symbol) {
            return None;
        }
        if ticker.last_price < self.config.min_price {
            debug!(symbol = %ticker.symbol, "dropped: price below floor");
            return None;
        }
        if ticker.quote_volume_24h < self.config.min_volume_24h {
            debug!(symbol = %ticker.symbol, "dropped: volume below floor");
            return None;
        }

        let spread_pct = ticker.spread_pct();
        if spread_pct > self.config.max_spread_pct {
            debug!(symbol = %ticker.symbol, spread = %spread_pct, "dropped: spread too wide");
            return None;
        }

        let volatility_pct = ticker.range_volatility_pct();
        if volatility_pct < self.config.min_volatility_pct {
            debug!(symbol = %ticker.symbol, volatility = volatility_pct, "dropped: too quiet");
            return None;
        }

        let daily_change_pct = ticker.price_change_pct;
        if daily_change_pct.abs() < self.config.min_daily_change_pct {
            debug!(symbol = %ticker.symbol, change = daily_change_pct, "dropped: no momentum");
            return None;
        }

        Some(RankingEntry {
            symbol: ticker.symbol.clone(),
            score: score(ticker, spread_pct, volatility_pct),
            volume_24h: ticker.quote_volume_24h,
            spread_pct,
            volatility_pct,
            daily_change_pct,
        })
    }
}

/// Monotone score: volatility and volume raise it, spread lowers it.
fn score(ticker: &MarketTicker, spread_pct: Decimal, volatility_pct: f64) -> f64 {
    let volume = ticker.quote_volume_24h.to_f64().unwrap_or(0.0);
    let spread = spread_pct.to_f64().unwrap_or(SPREAD_NORM);

    let volume_score = (volume / VOLUME_NORM).min(1.0);
    let volatility_score = (volatility_pct / PCT_NORM).min(1.0);
    let change_score = (ticker.price_change_pct.abs() / PCT_NORM).min(1.0);
    let spread_penalty = (spread / SPREAD_NORM).min(1.0);

    volume_score * 0.3 + volatility_score * 0.3 + change_score * 0.2 - spread_penalty * 0.2
}
