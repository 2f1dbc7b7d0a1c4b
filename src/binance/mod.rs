pub mod client;
pub mod stream;

pub use client::BinanceFuturesClient;
pub use stream::BinanceFuturesSource;
