// =============================================================================
// Shared types used across the candle feed
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One side of the order book as delivered upstream: price -> size.
pub type Ladder = BTreeMap<Decimal, Decimal>;

/// A single executed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Exchange event time, fractional seconds since the Unix epoch.
    pub event_time: f64,
    pub price: Decimal,
    pub amount: Decimal,
}

/// Full current ladder for both sides of the book.
///
/// A side is `None` when the upstream payload for it was missing or
/// malformed; the snapshotter turns that into an empty side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookUpdate {
    pub bids: Option<Ladder>,
    pub asks: Option<Ladder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenInterestUpdate {
    pub value: Decimal,
}

/// Tagged union of everything the event source can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Trade(Trade),
    Book(BookUpdate),
    OpenInterest(OpenInterestUpdate),
}

/// A decoded market event together with the local time it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub received_at: DateTime<Utc>,
    pub kind: EventKind,
}

impl MarketEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            received_at: Utc::now(),
            kind,
        }
    }
}

/// A single price level in a book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Document-store collection a record is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Candles,
    OrderBook,
    OpenInterest,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::OrderBook => "order_book",
            Self::OpenInterest => "open_interest",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
