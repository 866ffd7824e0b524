use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use gate_core::MarketSnapshot;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Source of market snapshots from the market-data collaborator.
#[async_trait]
pub trait SnapshotFeed: Send {
    /// Next snapshot, or None once the feed is exhausted.
    async fn next_snapshot(&mut self) -> Result<Option<MarketSnapshot>>;
}

/// Replays snapshots stored one JSON object per line.
pub struct JsonlSnapshotFeed {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    skipped: usize,
}

impl JsonlSnapshotFeed {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("failed to open snapshot file {}", path.display()))?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            skipped: 0,
        })
    }

    /// Lines that could not be parsed so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[async_trait]
impl SnapshotFeed for JsonlSnapshotFeed {
    async fn next_snapshot(&mut self) -> Result<Option<MarketSnapshot>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?
        {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MarketSnapshot>(&line) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(
                        "Skipping line {} of {}: {}",
                        self.line_no,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        Ok(None)
    }
}
