// =============================================================================
// Binance Futures REST Client — public market-data endpoints
// =============================================================================
//
// Only unauthenticated endpoints are used, so no key or request signing is
// needed. Open interest has no WebSocket channel and is polled from here.
// =============================================================================

use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Clone)]
pub struct BinanceFuturesClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client for BinanceFuturesClient")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch the current open interest for `symbol` (e.g. `BTCUSDT`).
    pub async fn fetch_open_interest(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET open interest for {symbol}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse open interest response")?;

        if !status.is_success() {
            anyhow::bail!("open interest API returned {}: {}", status, body);
        }

        let value = parse_open_interest(&body)?;
        debug!(symbol, value = %value, "open interest fetched");
        Ok(value)
    }
}

/// Parse the `/fapi/v1/openInterest` response body.
///
/// Expected shape:
/// ```json
/// { "openInterest": "10659.509", "symbol": "BTCUSDT", "time": 1589437530011 }
/// ```
pub fn parse_open_interest(body: &serde_json::Value) -> Result<Decimal> {
    let raw = body["openInterest"]
        .as_str()
        .context("missing field openInterest")?;
    let value = Decimal::from_str(raw)
        .with_context(|| format!("failed to parse openInterest as decimal: {raw}"))?;
    if value.is_sign_negative() {
        anyhow::bail!("negative open interest: {value}");
    }
    Ok(value)
}
