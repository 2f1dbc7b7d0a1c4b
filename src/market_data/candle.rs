// =============================================================================
// Candle Aggregator — 1-second OHLCV buckets built from individual trades
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::Trade;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single 1-second OHLCV candle.
///
/// `low <= open, close <= high` holds for every candle this module produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, whole seconds since the Unix epoch.
    pub start_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Open a candle from the first trade of its bucket.
    fn open_with(start_time: i64, price: Decimal, amount: Decimal) -> Self {
        Self {
            start_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: amount,
        }
    }

    fn apply(&mut self, price: Decimal, amount: Decimal) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += amount;
    }

    /// Bucket start as a UTC timestamp.
    pub fn start_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.start_time, 0).unwrap_or_default()
    }
}

/// What a single trade did to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleTransition {
    /// First trade ever seen; a candle now exists.
    Started,
    /// Trade landed in the current bucket.
    Updated,
    /// Trade landed in a different bucket; `previous` is the sealed candle.
    RolledOver { previous: Candle },
}

/// Copy of the aggregator's two candles handed to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CandlePair {
    pub current: Option<Candle>,
    pub last: Option<Candle>,
}

// ---------------------------------------------------------------------------
// CandleAggregator
// ---------------------------------------------------------------------------

/// Folds trades into 1-second buckets, keeping the in-progress candle and the
/// most recently completed one.
///
/// Any bucket mismatch rolls the candle, including a trade that arrives late
/// with an older second. Trades are never reordered or rejected here.
#[derive(Debug, Default)]
pub struct CandleAggregator {
    current: Option<Candle>,
    last: Option<Candle>,
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_trade(&mut self, trade: &Trade) -> CandleTransition {
        let bucket = trade.event_time.floor() as i64;

        match self.current.as_mut() {
            None => {
                self.current = Some(Candle::open_with(bucket, trade.price, trade.amount));
                info!(start_time = bucket, "initialized first candle");
                CandleTransition::Started
            }
            Some(candle) if candle.start_time == bucket => {
                candle.apply(trade.price, trade.amount);
                debug!(start_time = bucket, close = %candle.close, "updated current candle");
                CandleTransition::Updated
            }
            Some(candle) => {
                let previous = *candle;
                *candle = Candle::open_with(bucket, trade.price, trade.amount);
                self.last = Some(previous);
                info!(
                    sealed = previous.start_time,
                    start_time = bucket,
                    "candle rolled over"
                );
                CandleTransition::RolledOver { previous }
            }
        }
    }

    pub fn snapshot(&self) -> CandlePair {
        CandlePair {
            current: self.current,
            last: self.last,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
