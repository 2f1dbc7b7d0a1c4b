// =============================================================================
// JSONL Sink — one newline-delimited JSON file per collection
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::PersistenceSink;
use crate::types::Collection;

/// Appends each document as a single line to `<dir>/<collection>.jsonl`.
pub struct JsonlSink {
    dir: PathBuf,
    /// Serialises appends so concurrent writes never interleave within a line.
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collection.as_str()))
    }

    async fn append(&self, collection: Collection, document: Value) -> Result<()> {
        let mut line = serde_json::to_vec(&document).context("failed to serialise document")?;
        line.push(b'\n');

        let path = self.path_for(collection);
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        file.write_all(&line)
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

impl PersistenceSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, Result<()>> {
        self.append(collection, document).boxed()
    }
}
