use serde_json::{json, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Failure reaching one of the services
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// One request/response pair with its wall-clock latency
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    /// Parsed JSON body, or the raw text as a string when it is not JSON
    pub body: Value,
    pub duration_ms: u64,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// String field of the response body
    pub fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }
}

/// Thin client over the two service APIs
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    ingest_url: String,
    process_url: String,
}

impl ServiceClient {
    pub fn new(ingest_url: &str, process_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            ingest_url: ingest_url.trim_end_matches('/').to_string(),
            process_url: process_url.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /ingest` with an inline payload
    pub async fn ingest_inline(&self, data: &str, filename: &str) -> Result<Exchange, ClientError> {
        let url = format!("{}/ingest", self.ingest_url);
        self.post_json(&url, &json!({ "data": data, "filename": filename }))
            .await
    }

    /// `POST /predict`
    pub async fn predict(&self, file_id: &str, model: &str) -> Result<Exchange, ClientError> {
        let url = format!("{}/predict", self.process_url);
        self.post_json(&url, &json!({ "fileId": file_id, "model": model }))
            .await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Exchange, ClientError> {
        let http_err = |source: reqwest::Error| ClientError::Http {
            endpoint: url.to_string(),
            source,
        };

        let started = Instant::now();
        let response = self.http.post(url).json(body).send().await.map_err(http_err)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(http_err)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(url, status, duration_ms, body = %text, "Response received");

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(Exchange {
            status,
            body,
            duration_ms,
        })
    }
}
