//! Historical replay: drives the engine from a JSON-lines event file.
//!
//! One `MarketEvent` per line, in chronological order. Replaying the same
//! file with the same configuration reproduces the same decisions, which is
//! what makes the engine's behavior auditable offline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::MarketEvent;

pub struct ReplayFeed {
    path: PathBuf,
}

impl ReplayFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stream every event in file order into `tx`. Malformed lines are
    /// logged and skipped (data fault, not fatal). Returns the number of
    /// events delivered; stops early if the receiver goes away.
    pub async fn run(self, tx: mpsc::Sender<MarketEvent>) -> Result<usize> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open event file {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let mut delivered = 0usize;
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event: MarketEvent = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_no, error = %e, "skipping malformed event line");
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                debug!(line = line_no, "event receiver closed, stopping replay");
                break;
            }
            delivered += 1;
        }

        Ok(delivered)
    }
}
