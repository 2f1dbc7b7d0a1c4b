// =============================================================================
// HTTP Document Sink — remote document store via an `insertOne` action
// =============================================================================
//
// Speaks the common data-API shape used by hosted document stores:
//
//   POST {base_url}/action/insertOne
//   api-key: <key>
//   { "dataSource": ..., "database": ..., "collection": ..., "document": {...} }
//
// SECURITY: the API key is sent as a header only and never logged.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::debug;

use super::PersistenceSink;
use crate::config::PersistenceConfig;
use crate::types::Collection;

pub struct HttpDocumentSink {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    data_source: Option<String>,
    api_key: Option<String>,
}

impl HttpDocumentSink {
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        let base_url = config
            .http_url
            .as_deref()
            .context("http backend requires persistence.http_url")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build reqwest client for HttpDocumentSink")?;

        Ok(Self {
            client,
            endpoint: format!("{}/action/insertOne", base_url.trim_end_matches('/')),
            database: config.http_database.clone(),
            data_source: config.http_data_source.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request_body(&self, collection: Collection, document: Value) -> Value {
        let mut body = json!({
            "database": self.database,
            "collection": collection.as_str(),
            "document": document,
        });
        if let (Some(ds), Some(obj)) = (&self.data_source, body.as_object_mut()) {
            obj.insert("dataSource".to_string(), Value::String(ds.clone()));
        }
        body
    }

    async fn post(&self, collection: Collection, document: Value) -> Result<()> {
        let body = self.request_body(collection, document);

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("POST insertOne into {collection}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("document store returned {}: {}", status, text);
        }

        debug!(collection = %collection, status = %status, "document inserted");
        Ok(())
    }
}

impl PersistenceSink for HttpDocumentSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, Result<()>> {
        self.post(collection, document).boxed()
    }
}
