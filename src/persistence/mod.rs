// =============================================================================
// Persistence — fire-and-forget writes of completed records
// =============================================================================
//
// Reducers never wait on storage. The ingestor hands each completed record to
// `Persister::submit`, which spawns one bounded task per write:
//
//   - every write is wrapped in a timeout,
//   - at most `max_in_flight` writes run at once (extra records are dropped),
//   - failures are logged here and go nowhere else.
// =============================================================================

pub mod http;
pub mod jsonl;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{PersistenceConfig, SinkBackend};
use crate::market_data::{BookSnapshot, Candle, OpenInterestState};
use crate::types::Collection;

pub use http::HttpDocumentSink;
pub use jsonl::JsonlSink;

// =============================================================================
// Sink abstraction
// =============================================================================

/// A document store that accepts one document at a time.
pub trait PersistenceSink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, Result<()>>;
}

/// Sink that only logs what it would have written.
#[derive(Debug, Default)]
pub struct LogSink;

impl PersistenceSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, Result<()>> {
        async move {
            debug!(collection = %collection, document = %document, "record (log sink)");
            Ok(())
        }
        .boxed()
    }
}

/// Build the sink selected in `config`.
pub fn build_sink(config: &PersistenceConfig) -> Result<Arc<dyn PersistenceSink>> {
    let sink: Arc<dyn PersistenceSink> = match config.backend {
        SinkBackend::Log => Arc::new(LogSink),
        SinkBackend::Jsonl => {
            let dir = config
                .jsonl_dir
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("jsonl backend requires persistence.jsonl_dir"))?;
            Arc::new(JsonlSink::new(dir))
        }
        SinkBackend::Http => Arc::new(HttpDocumentSink::from_config(config)?),
    };
    info!(backend = sink.name(), "persistence sink ready");
    Ok(sink)
}

// =============================================================================
// Documents
// =============================================================================

pub fn candle_document(candle: &Candle) -> Value {
    json!({
        "record_id": uuid::Uuid::new_v4().to_string(),
        "type": "last_candle",
        "data": candle,
    })
}

pub fn book_document(snapshot: &BookSnapshot, received_at: DateTime<Utc>) -> Value {
    json!({
        "record_id": uuid::Uuid::new_v4().to_string(),
        "timestamp": received_at.to_rfc3339(),
        "data": snapshot,
    })
}

pub fn open_interest_document(state: &OpenInterestState) -> Value {
    json!({
        "record_id": uuid::Uuid::new_v4().to_string(),
        "timestamp": state.as_of.to_rfc3339(),
        "value": state.value,
    })
}

// =============================================================================
// Persister
// =============================================================================

#[derive(Clone)]
pub struct Persister {
    sink: Arc<dyn PersistenceSink>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Persister {
    pub fn new(sink: Arc<dyn PersistenceSink>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            sink,
            timeout,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    pub fn from_config(sink: Arc<dyn PersistenceSink>, config: &PersistenceConfig) -> Self {
        Self::new(sink, config.timeout(), config.max_in_flight)
    }

    /// Spawn a write of `document` and return immediately.
    ///
    /// Must be called from within a tokio runtime. Returns `None` when the
    /// record was dropped because too many writes are already in flight.
    pub fn submit(&self, collection: Collection, document: Value) -> Option<JoinHandle<()>> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(collection = %collection, "persistence backlog full, dropping record");
                return None;
            }
        };

        let sink = Arc::clone(&self.sink);
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            let _permit = permit;
            match tokio::time::timeout(timeout, sink.insert(collection, document)).await {
                Ok(Ok(())) => debug!(collection = %collection, "saved record"),
                Ok(Err(e)) => {
                    error!(collection = %collection, error = %e, "error saving record")
                }
                Err(_) => error!(
                    collection = %collection,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out saving record"
                ),
            }
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    /// Records every insert; optionally fails or stalls.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) fail: bool,
        pub(crate) delay: Option<Duration>,
        pub(crate) inserted: Mutex<Vec<(Collection, Value)>>,
    }

    impl RecordingSink {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn collections(&self) -> Vec<Collection> {
            self.inserted.lock().iter().map(|(c, _)| *c).collect()
        }
    }

    impl PersistenceSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, Result<()>> {
            async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail {
                    anyhow::bail!("store unavailable");
                }
                self.inserted.lock().push((collection, document));
                Ok(())
            }
            .boxed()
        }
    }

    #[test]
    fn candle_document_shape() {
        let candle = Candle {
            start_time: 10,
            open: dec!(100),
            high: dec!(102),
            low: dec!(100),
            close: dec!(102),
            volume: dec!(3),
        };
        let doc = candle_document(&candle);
        assert_eq!(doc["type"], "last_candle");
        assert_eq!(doc["data"]["start_time"], 10);
        assert_eq!(doc["data"]["high"], json!(102.0));
        assert!(doc["record_id"].is_string());
    }

    #[test]
    fn open_interest_document_shape() {
        let as_of = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let doc = open_interest_document(&OpenInterestState {
            value: dec!(12.5),
            as_of,
        });
        assert_eq!(doc["timestamp"], "2023-11-14T22:13:20+00:00");
        assert_eq!(doc["value"], json!(12.5));
    }

    #[tokio::test]
    async fn submitted_record_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let persister = Persister::new(sink.clone(), Duration::from_secs(1), 4);

        let handle = persister
            .submit(Collection::OpenInterest, json!({"value": 1}))
            .expect("permit available");
        handle.await.unwrap();

        assert_eq!(sink.collections(), vec![Collection::OpenInterest]);
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let persister = Persister::new(Arc::new(RecordingSink::failing()), Duration::from_secs(1), 4);
        let handle = persister
            .submit(Collection::Candles, json!({}))
            .expect("permit available");
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn slow_sink_is_cut_off_by_timeout() {
        let sink = Arc::new(RecordingSink::slow(Duration::from_secs(30)));
        let persister = Persister::new(sink.clone(), Duration::from_millis(20), 4);

        let handle = persister
            .submit(Collection::OrderBook, json!({}))
            .expect("permit available");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("write task should end at its own timeout")
            .unwrap();
        assert!(sink.collections().is_empty());
    }

    #[tokio::test]
    async fn backlog_limit_drops_extra_records() {
        let sink = Arc::new(RecordingSink::slow(Duration::from_millis(200)));
        let persister = Persister::new(sink.clone(), Duration::from_secs(5), 2);

        let a = persister.submit(Collection::OrderBook, json!({"n": 1}));
        let b = persister.submit(Collection::OrderBook, json!({"n": 2}));
        let c = persister.submit(Collection::OrderBook, json!({"n": 3}));
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());

        a.unwrap().await.unwrap();
        b.unwrap().await.unwrap();
        assert_eq!(sink.collections().len(), 2);

        // Permits are returned once writes finish.
        assert!(persister.submit(Collection::OrderBook, json!({"n": 4})).is_some());
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        assert!(LogSink.insert(Collection::Candles, json!({})).await.is_ok());
    }
}
