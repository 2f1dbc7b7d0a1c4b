// =============================================================================
// Ingestion — event source seam and the single dispatch point into state
// =============================================================================

pub mod supervisor;

use std::sync::Arc;

use anyhow::Result;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::info;

use crate::app_state::SharedState;
use crate::market_data::CandleTransition;
use crate::persistence::{book_document, candle_document, open_interest_document, Persister};
use crate::types::{Collection, EventKind, MarketEvent};

pub use supervisor::Supervisor;

/// Live sequence of decoded events. An `Err` item or the end of the stream
/// means the transport is gone.
pub type EventStream = BoxStream<'static, Result<MarketEvent>>;

/// Something that can (re)establish a market-data session.
pub trait EventSource: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<EventStream>>;
}

/// Applies events to `SharedState` and forwards completed records to storage.
pub struct Ingestor {
    state: Arc<SharedState>,
    persister: Persister,
    persist_unchanged_books: bool,
}

impl Ingestor {
    pub fn new(state: Arc<SharedState>, persister: Persister, persist_unchanged_books: bool) -> Self {
        Self {
            state,
            persister,
            persist_unchanged_books,
        }
    }

    /// Run one reducer step for `event`.
    ///
    /// The state lock is released before anything is handed to the persister.
    /// Returns the spawned write, if one was started.
    pub fn dispatch(&self, event: MarketEvent) -> Option<JoinHandle<()>> {
        match event.kind {
            EventKind::Trade(trade) => match self.state.apply_trade(&trade) {
                CandleTransition::RolledOver { previous } => {
                    info!(start_time = previous.start_time, "saving completed candle");
                    self.persister
                        .submit(Collection::Candles, candle_document(&previous))
                }
                CandleTransition::Started | CandleTransition::Updated => None,
            },
            EventKind::Book(update) => {
                let (snapshot, changed) = self.state.apply_book_update(&update);
                if changed || self.persist_unchanged_books {
                    self.persister.submit(
                        Collection::OrderBook,
                        book_document(&snapshot, event.received_at),
                    )
                } else {
                    None
                }
            }
            EventKind::OpenInterest(update) => {
                let oi = self
                    .state
                    .apply_open_interest(update.value, event.received_at);
                self.persister
                    .submit(Collection::OpenInterest, open_interest_document(&oi))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
