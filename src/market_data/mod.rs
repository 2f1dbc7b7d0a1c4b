pub mod candle;
pub mod open_interest;
pub mod orderbook;

pub use candle::{Candle, CandleAggregator, CandlePair, CandleTransition};
pub use open_interest::{OpenInterestState, OpenInterestTracker};
pub use orderbook::{BookSnapshot, BookSnapshotter};
