// =============================================================================
// Binance Futures Event Source — aggTrade + partial depth + polled OI
// =============================================================================
//
// One session = one combined-stream WebSocket carrying trades and book depth,
// merged with a REST poll for open interest. The session stream yields an
// `Err` as soon as the socket errors or closes, which hands control back to
// the supervisor for a reconnect.
// =============================================================================

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{stream, StreamExt};
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::client::BinanceFuturesClient;
use crate::ingest::{EventSource, EventStream};
use crate::types::{BookUpdate, EventKind, Ladder, MarketEvent, OpenInterestUpdate, Trade};

pub struct BinanceFuturesSource {
    stream_base_url: String,
    symbol: String,
    rest: BinanceFuturesClient,
    oi_poll_interval: Duration,
}

impl BinanceFuturesSource {
    /// `symbol` is exchange-native, e.g. `BTCUSDT`.
    pub fn new(
        stream_base_url: impl Into<String>,
        symbol: impl Into<String>,
        rest: BinanceFuturesClient,
        oi_poll_interval: Duration,
    ) -> Self {
        Self {
            stream_base_url: stream_base_url.into().trim_end_matches('/').to_string(),
            symbol: symbol.into().to_uppercase(),
            rest,
            oi_poll_interval,
        }
    }

    pub fn stream_url(&self) -> String {
        let lower = self.symbol.to_lowercase();
        format!(
            "{}/stream?streams={lower}@aggTrade/{lower}@depth20@100ms",
            self.stream_base_url
        )
    }

    async fn open_session(&self) -> Result<EventStream> {
        let url = self.stream_url();
        info!(url = %url, symbol = %self.symbol, "connecting to futures WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to futures WebSocket")?;

        info!(symbol = %self.symbol, "futures WebSocket connected");

        let market = ws_stream
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => match parse_stream_message(&text) {
                        Ok(Some(kind)) => Some(Ok(MarketEvent::now(kind))),
                        Ok(None) => None,
                        Err(e) => {
                            warn!(error = %e, "failed to parse stream message");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        warn!(frame = ?frame, "futures WebSocket closed by server");
                        None
                    }
                    // Ping / Pong / Binary / Frame -- tungstenite answers pings itself.
                    Ok(_) => None,
                    Err(e) => Some(Err(
                        anyhow::Error::new(e).context("futures WebSocket read error")
                    )),
                }
            })
            .chain(stream::once(async {
                Err(anyhow::anyhow!("futures WebSocket stream ended"))
            }));

        let open_interest = poll_open_interest(
            self.rest.clone(),
            self.symbol.clone(),
            self.oi_poll_interval,
        );

        Ok(stream::select(market, open_interest).boxed())
    }
}

impl EventSource for BinanceFuturesSource {
    fn connect(&self) -> BoxFuture<'_, Result<EventStream>> {
        self.open_session().boxed()
    }
}

/// Endless stream of open interest readings. Failed polls are logged and
/// skipped; they never end the session.
fn poll_open_interest(
    client: BinanceFuturesClient,
    symbol: String,
    period: Duration,
) -> impl futures_util::Stream<Item = Result<MarketEvent>> + Send + 'static {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    stream::unfold((client, symbol, ticker), |(client, symbol, mut ticker)| async move {
        loop {
            ticker.tick().await;
            match client.fetch_open_interest(&symbol).await {
                Ok(value) => {
                    let event =
                        MarketEvent::now(EventKind::OpenInterest(OpenInterestUpdate { value }));
                    return Some((Ok(event), (client, symbol, ticker)));
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "open interest poll failed"),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one combined-stream message.
///
/// Expected envelope:
/// ```json
/// { "stream": "btcusdt@aggTrade", "data": { "e": "aggTrade", ... } }
/// ```
/// A bare payload without the envelope is accepted too. Returns `Ok(None)`
/// for messages that carry no market data (e.g. subscription acks).
pub fn parse_stream_message(text: &str) -> Result<Option<EventKind>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    match data["e"].as_str() {
        Some("aggTrade") | Some("trade") => {
            parse_agg_trade(data).map(|t| Some(EventKind::Trade(t)))
        }
        Some("depthUpdate") => Ok(Some(EventKind::Book(parse_depth(data)))),
        // Spot-style partial depth carries no event type.
        None if data.get("lastUpdateId").is_some() => {
            Ok(Some(EventKind::Book(parse_depth(data))))
        }
        _ => Ok(None),
    }
}

/// Parse an aggTrade payload.
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "E": 123456789, "s": "BTCUSDT", "p": "0.001", "q": "100", "T": 123456785, "m": true }
/// ```
fn parse_agg_trade(data: &serde_json::Value) -> Result<Trade> {
    let trade_time_ms = data["T"].as_i64().context("missing field T")?;
    let price = parse_decimal(&data["p"], "p")?;
    let amount = parse_decimal(&data["q"], "q")?;

    if price.is_sign_negative() {
        anyhow::bail!("negative trade price: {price}");
    }
    if amount.is_sign_negative() {
        anyhow::bail!("negative trade amount: {amount}");
    }

    Ok(Trade {
        event_time: trade_time_ms as f64 / 1000.0,
        price,
        amount,
    })
}

/// Parse a depth payload into full ladders. A malformed side becomes `None`.
///
/// Expected shape:
/// ```json
/// { "e": "depthUpdate", "b": [["37000.00", "1.5"], ...], "a": [["37001.00", "1.2"], ...] }
/// ```
fn parse_depth(data: &serde_json::Value) -> BookUpdate {
    let bids = data.get("b").or_else(|| data.get("bids"));
    let asks = data.get("a").or_else(|| data.get("asks"));
    BookUpdate {
        bids: bids.and_then(|side| parse_ladder(side, "bids")),
        asks: asks.and_then(|side| parse_ladder(side, "asks")),
    }
}

fn parse_ladder(side: &serde_json::Value, name: &str) -> Option<Ladder> {
    let levels = side.as_array()?;
    let mut ladder = Ladder::new();
    for level in levels {
        match parse_level(level) {
            Ok((price, size)) => {
                ladder.insert(price, size);
            }
            Err(e) => {
                warn!(side = name, error = %e, "malformed book level, dropping side");
                return None;
            }
        }
    }
    Some(ladder)
}

/// One `["price", "size"]` pair.
fn parse_level(level: &serde_json::Value) -> Result<(Decimal, Decimal)> {
    let pair = level.as_array().context("book level is not an array")?;
    let price = parse_decimal(pair.first().context("missing level price")?, "price")?;
    let size = parse_decimal(pair.get(1).context("missing level size")?, "size")?;
    Ok((price, size))
}

/// Binance sends numeric values as JSON strings.
fn parse_decimal(val: &serde_json::Value, name: &str) -> Result<Decimal> {
    match val {
        serde_json::Value::String(s) => Decimal::from_str(s)
            .with_context(|| format!("failed to parse {name} as decimal: {s}")),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .with_context(|| format!("field {name} is not a valid decimal")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
