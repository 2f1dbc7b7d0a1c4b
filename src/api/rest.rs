// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only views over `SharedState`. Every endpoint answers 200; values not
// yet seen since startup are reported as `null` or empty arrays, so upstream
// or storage trouble never turns into an error status here.
//
// CORS is permissive: the API is public market data with no credentials.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::SharedState;
use crate::market_data::Candle;
use crate::types::Level;

// =============================================================================
// Router construction
// =============================================================================

/// Build the API router with CORS middleware and shared state.
pub fn router(state: Arc<SharedState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/candle", get(candle))
        .route("/open-interest", get(open_interest))
        .route("/order-book", get(order_book))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Index
// =============================================================================

async fn index() -> impl IntoResponse {
    info!("received request for API index");
    Json(json!({
        "message": "Welcome to the Binance Futures Data API",
        "endpoints": {
            "/candle": "Get current and last completed 1-second candle",
            "/open-interest": "Get latest open interest data",
            "/order-book": "Get top-10 bids and asks from the order book",
        }
    }))
}

// =============================================================================
// Candles
// =============================================================================

/// Wire form of a candle: RFC 3339 start time, numeric prices (decimals
/// serialize as JSON numbers crate-wide).
#[derive(Debug, Serialize)]
struct CandleView {
    start_time: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl From<Candle> for CandleView {
    fn from(c: Candle) -> Self {
        Self {
            start_time: c.start_datetime().to_rfc3339(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

#[derive(Debug, Serialize)]
struct CandleResponse {
    current: Option<CandleView>,
    last: Option<CandleView>,
}

async fn candle(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    info!("received request for candle data");
    let pair = state.read_candles();
    Json(CandleResponse {
        current: pair.current.map(CandleView::from),
        last: pair.last.map(CandleView::from),
    })
}

// =============================================================================
// Open interest
// =============================================================================

#[derive(Debug, Serialize)]
struct OpenInterestResponse {
    value: Option<Decimal>,
    timestamp: Option<String>,
}

async fn open_interest(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    info!("received request for open interest data");
    let latest = state.read_open_interest();
    Json(OpenInterestResponse {
        value: latest.map(|oi| oi.value),
        timestamp: latest.map(|oi| oi.as_of.to_rfc3339()),
    })
}

// =============================================================================
// Order book
// =============================================================================

#[derive(Debug, Serialize)]
struct OrderBookResponse {
    bids: Vec<Level>,
    asks: Vec<Level>,
}

async fn order_book(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    info!("received request for order book data");
    let book = state.read_book();
    Json(OrderBookResponse {
        bids: book.bids,
        asks: book.asks,
    })
}

// =============================================================================
// Tests
// =============================================================================
