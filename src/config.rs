// =============================================================================
// Feed Configuration — JSON file with per-field defaults and env overrides
// =============================================================================
//
// Every field carries `#[serde(default)]` so that an empty or partial file is
// always loadable. Secrets (the document-store API key) are expected from the
// environment rather than the file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::market_data::orderbook::DEFAULT_DEPTH;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_book_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_stream_base_url() -> String {
    "wss://fstream.binance.com".to_string()
}

fn default_rest_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_open_interest_poll_secs() -> u64 {
    5
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_http_database() -> String {
    "cryptofeed_db".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_in_flight() -> usize {
    256
}

// =============================================================================
// ReconnectConfig
// =============================================================================

/// Backoff between ingestion reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay after the first failure.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied per consecutive failure.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of the delay randomised in either direction (0.0 - 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// =============================================================================
// PersistenceConfig
// =============================================================================

/// Which document store completed records are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// Debug-log documents only.
    #[default]
    Log,
    /// Append newline-delimited JSON per collection.
    Jsonl,
    /// Remote document store over HTTP (`insertOne` action).
    Http,
}

impl std::fmt::Display for SinkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Jsonl => write!(f, "jsonl"),
            Self::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: SinkBackend,

    /// Directory for the `jsonl` backend.
    #[serde(default)]
    pub jsonl_dir: Option<String>,

    /// Base URL of the document store for the `http` backend.
    #[serde(default)]
    pub http_url: Option<String>,

    #[serde(default = "default_http_database")]
    pub http_database: String,

    /// Cluster / data source name sent with every insert.
    #[serde(default)]
    pub http_data_source: Option<String>,

    /// API key for the document store. Never serialised back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Upper bound on a single write.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Writes allowed in flight at once; extra records are dropped.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Persist a book snapshot even when its top levels did not change.
    #[serde(default = "default_true")]
    pub persist_unchanged_books: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::default(),
            jsonl_dir: None,
            http_url: None,
            http_database: default_http_database(),
            http_data_source: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            persist_unchanged_books: true,
        }
    }
}

impl PersistenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// FeedConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Instrument to follow. `BTCUSDT` and `BTC-USDT-PERP` are both accepted.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Address the HTTP API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Levels kept per side of the book snapshot.
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,

    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Seconds between open interest polls.
    #[serde(default = "default_open_interest_poll_secs")]
    pub open_interest_poll_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            bind_addr: default_bind_addr(),
            book_depth: default_book_depth(),
            stream_base_url: default_stream_base_url(),
            rest_base_url: default_rest_base_url(),
            open_interest_poll_secs: default_open_interest_poll_secs(),
            reconnect: ReconnectConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            backend = %config.persistence.backend,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Apply `CANDLE_FEED_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(symbol) = lookup("CANDLE_FEED_SYMBOL").filter(|s| !s.trim().is_empty()) {
            self.symbol = symbol.trim().to_string();
        }
        if let Some(addr) = lookup("CANDLE_FEED_BIND_ADDR").filter(|s| !s.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(key) = lookup("CANDLE_FEED_STORE_API_KEY").filter(|s| !s.is_empty()) {
            self.persistence.api_key = Some(key);
        }
    }

    /// Exchange-native symbol, e.g. `BTC-USDT-PERP` -> `BTCUSDT`.
    pub fn exchange_symbol(&self) -> String {
        let upper = self.symbol.trim().to_uppercase();
        upper
            .strip_suffix("-PERP")
            .unwrap_or(&upper)
            .replace('-', "")
    }

    pub fn open_interest_poll_interval(&self) -> Duration {
        Duration::from_secs(self.open_interest_poll_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.exchange_symbol().is_empty() {
            bail!("symbol must not be empty");
        }
        if self.book_depth == 0 {
            bail!("book_depth must be at least 1");
        }
        if self.open_interest_poll_secs == 0 {
            bail!("open_interest_poll_secs must be at least 1");
        }
        let rc = &self.reconnect;
        if !(rc.multiplier >= 1.0) {
            bail!("reconnect.multiplier must be >= 1.0, got {}", rc.multiplier);
        }
        if !(0.0..=1.0).contains(&rc.jitter) {
            bail!("reconnect.jitter must be within [0, 1], got {}", rc.jitter);
        }
        if rc.initial_delay_ms > rc.max_delay_ms {
            bail!(
                "reconnect.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                rc.initial_delay_ms,
                rc.max_delay_ms
            );
        }
        let p = &self.persistence;
        if p.max_in_flight == 0 {
            bail!("persistence.max_in_flight must be at least 1");
        }
        match p.backend {
            SinkBackend::Jsonl if p.jsonl_dir.is_none() => {
                bail!("persistence.jsonl_dir is required for the jsonl backend")
            }
            SinkBackend::Http if p.http_url.is_none() => {
                bail!("persistence.http_url is required for the http backend")
            }
            _ => {}
        }
        Ok(())
    }
}
