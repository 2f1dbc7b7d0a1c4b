// =============================================================================
// Shared State — the single owner of every aggregated view
// =============================================================================
//
// One instance is created in main and handed (as `Arc<SharedState>`) to both
// the ingestion supervisor and the HTTP router. Fields are private: the only
// way to mutate is through the `apply_*` reducer steps, and readers always get
// owned copies.
//
// Thread safety:
//   - One parking_lot::Mutex per slice (candles, book, open interest), so a
//     slow reader of one slice never holds up writers of another.
//   - Locks are held only for the in-memory step or copy. Persistence and
//     response writing happen after the guard is dropped.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::market_data::{
    BookSnapshot, BookSnapshotter, CandleAggregator, CandlePair, CandleTransition,
    OpenInterestState, OpenInterestTracker,
};
use crate::types::{BookUpdate, Trade};

pub struct SharedState {
    candles: Mutex<CandleAggregator>,
    book: Mutex<BookSnapshotter>,
    open_interest: Mutex<OpenInterestTracker>,
}

impl SharedState {
    /// Build an empty state whose book snapshots keep `book_depth` levels.
    pub fn new(book_depth: usize) -> Self {
        Self {
            candles: Mutex::new(CandleAggregator::new()),
            book: Mutex::new(BookSnapshotter::new(book_depth)),
            open_interest: Mutex::new(OpenInterestTracker::new()),
        }
    }

    // ── Writers ─────────────────────────────────────────────────────────

    pub fn apply_trade(&self, trade: &Trade) -> CandleTransition {
        self.candles.lock().on_trade(trade)
    }

    pub fn apply_book_update(&self, update: &BookUpdate) -> (BookSnapshot, bool) {
        self.book.lock().on_book_update(update)
    }

    pub fn apply_open_interest(
        &self,
        value: Decimal,
        received_at: DateTime<Utc>,
    ) -> OpenInterestState {
        self.open_interest.lock().on_open_interest(value, received_at)
    }

    // ── Readers ─────────────────────────────────────────────────────────

    pub fn read_candles(&self) -> CandlePair {
        self.candles.lock().snapshot()
    }

    pub fn read_book(&self) -> BookSnapshot {
        self.book.lock().snapshot()
    }

    pub fn read_open_interest(&self) -> Option<OpenInterestState> {
        self.open_interest.lock().latest()
    }
}

// =============================================================================
// Tests
// =============================================================================
