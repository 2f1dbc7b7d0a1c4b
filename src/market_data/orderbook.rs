// =============================================================================
// Book Snapshotter — fixed-depth top-of-book from full upstream ladders
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{BookUpdate, Ladder, Level};

/// Default number of levels kept per side.
pub const DEFAULT_DEPTH: usize = 10;

/// Top-N view of the book. Bids best (highest) first, asks best (lowest) first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Rebuilds the snapshot from scratch on every update.
#[derive(Debug)]
pub struct BookSnapshotter {
    depth: usize,
    current: BookSnapshot,
}

impl BookSnapshotter {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            current: BookSnapshot::default(),
        }
    }

    /// Replace the snapshot with the top `depth` levels of `update`.
    ///
    /// Returns the new snapshot and whether it differs from the previous one.
    pub fn on_book_update(&mut self, update: &BookUpdate) -> (BookSnapshot, bool) {
        let bids = match &update.bids {
            Some(ladder) => top_levels(ladder.iter().rev(), self.depth),
            None => {
                warn!("bid ladder unavailable, publishing empty bids");
                Vec::new()
            }
        };
        let asks = match &update.asks {
            Some(ladder) => top_levels(ladder.iter(), self.depth),
            None => {
                warn!("ask ladder unavailable, publishing empty asks");
                Vec::new()
            }
        };

        let next = BookSnapshot { bids, asks };
        let changed = next != self.current;
        self.current = next.clone();

        debug!(
            bids = self.current.bids.len(),
            asks = self.current.asks.len(),
            changed,
            "updated order book snapshot"
        );
        (next, changed)
    }

    pub fn snapshot(&self) -> BookSnapshot {
        self.current.clone()
    }
}

impl Default for BookSnapshotter {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

fn top_levels<'a>(
    levels: impl Iterator<Item = (&'a Decimal, &'a Decimal)>,
    depth: usize,
) -> Vec<Level> {
    levels
        .take(depth)
        .map(|(price, amount)| Level {
            price: *price,
            amount: *amount,
        })
        .collect()
}

/// Build a ladder from `(price, size)` pairs; later duplicates win.
pub fn ladder_from<I>(levels: I) -> Ladder
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    levels.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prices(levels: &[Level]) -> Vec<Decimal> {
        levels.iter().map(|l| l.price).collect()
    }

    #[test]
    fn sorts_bids_descending_and_asks_ascending() {
        let mut snap = BookSnapshotter::default();
        let update = BookUpdate {
            bids: Some(ladder_from([
                (dec!(100), dec!(1)),
                (dec!(99), dec!(2)),
                (dec!(101), dec!(0.5)),
            ])),
            asks: Some(ladder_from([(dec!(102), dec!(1)), (dec!(103), dec!(2))])),
        };

        let (book, changed) = snap.on_book_update(&update);
        assert!(changed);
        assert_eq!(prices(&book.bids), vec![dec!(101), dec!(100), dec!(99)]);
        assert_eq!(prices(&book.asks), vec![dec!(102), dec!(103)]);
        assert_eq!(book.bids[0].amount, dec!(0.5));
    }

    #[test]
    fn truncates_each_side_to_depth() {
        let mut snap = BookSnapshotter::new(DEFAULT_DEPTH);
        let bids = ladder_from((1..=25).map(|p| (Decimal::from(p), dec!(1))));
        let asks = ladder_from((26..=50).map(|p| (Decimal::from(p), dec!(1))));

        let (book, _) = snap.on_book_update(&BookUpdate {
            bids: Some(bids),
            asks: Some(asks),
        });

        assert_eq!(book.bids.len(), 10);
        assert_eq!(book.asks.len(), 10);
        assert_eq!(book.bids.first().map(|l| l.price), Some(dec!(25)));
        assert_eq!(book.bids.last().map(|l| l.price), Some(dec!(16)));
        assert_eq!(book.asks.first().map(|l| l.price), Some(dec!(26)));
        assert_eq!(book.asks.last().map(|l| l.price), Some(dec!(35)));
    }

    #[test]
    fn latest_update_replaces_everything() {
        let mut snap = BookSnapshotter::default();
        snap.on_book_update(&BookUpdate {
            bids: Some(ladder_from([(dec!(1), dec!(1)), (dec!(2), dec!(1))])),
            asks: Some(ladder_from([(dec!(3), dec!(1))])),
        });
        snap.on_book_update(&BookUpdate {
            bids: Some(ladder_from([(dec!(7), dec!(4))])),
            asks: Some(Ladder::new()),
        });

        let book = snap.snapshot();
        assert_eq!(
            book.bids,
            vec![Level {
                price: dec!(7),
                amount: dec!(4)
            }]
        );
        assert!(book.asks.is_empty());
    }

    #[test]
    fn missing_side_degrades_to_empty() {
        let mut snap = BookSnapshotter::default();
        let (book, _) = snap.on_book_update(&BookUpdate {
            bids: None,
            asks: Some(ladder_from([(dec!(5), dec!(1))])),
        });
        assert!(book.bids.is_empty());
        assert_eq!(prices(&book.asks), vec![dec!(5)]);
    }

    #[test]
    fn identical_update_reports_unchanged() {
        let mut snap = BookSnapshotter::default();
        let update = BookUpdate {
            bids: Some(ladder_from([(dec!(10), dec!(1))])),
            asks: Some(ladder_from([(dec!(11), dec!(1))])),
        };
        let (_, first) = snap.on_book_update(&update);
        let (_, second) = snap.on_book_update(&update);
        assert!(first);
        assert!(!second);
    }
}
