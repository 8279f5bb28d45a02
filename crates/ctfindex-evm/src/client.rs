//! Chain access over JSON-RPC.
//!
//! The scanner needs `eth_blockNumber` for the head and `eth_getLogs` for a
//! bounded block range; single-transaction decoding reads the logs of one
//! receipt through `eth_getTransactionReceipt`. `HttpChainClient` retries
//! transient transport failures with exponential backoff; JSON-RPC error
//! objects are returned as is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ctfindex_core::error::IndexerError;
use ctfindex_core::retry::{RetryConfig, RetryPolicy};
use ctfindex_core::types::{parse_hex_u64, to_hex_0x, to_hex_quantity, RawLog};

/// Read-only view of the chain needed by the scanner.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn latest_height(&self) -> Result<u64, IndexerError>;

    /// Logs in `[from, to]` emitted by any of `addresses` with `topic0`.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<RawLog>, IndexerError>;

    /// All logs emitted by `tx_hash`, or `None` if the node has no receipt
    /// for it (unknown or still pending).
    async fn transaction_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, IndexerError>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    async fn latest_height(&self) -> Result<u64, IndexerError> {
        (**self).latest_height().await
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<RawLog>, IndexerError> {
        (**self).get_logs(from, to, addresses, topic0).await
    }

    async fn transaction_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, IndexerError> {
        (**self).transaction_logs(tx_hash).await
    }
}

// ─── JSON-RPC wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, IndexerError> {
        match self.error {
            Some(err) => Err(IndexerError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The `eth_getLogs` filter object.
pub fn logs_filter(from: u64, to: u64, addresses: &[Address], topic0: B256) -> Value {
    let addresses: Vec<String> = addresses.iter().map(|a| to_hex_0x(a.as_slice())).collect();
    json!({
        "fromBlock": to_hex_quantity(from),
        "toBlock": to_hex_quantity(to),
        "address": addresses,
        "topics": [to_hex_0x(topic0.as_slice())],
    })
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC client over HTTP(S).
pub struct HttpChainClient {
    url: url::Url,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpChainClient {
    /// Build a client for `endpoint`. The URL is validated up front so a bad
    /// endpoint fails before scanning starts.
    pub fn new(endpoint: &str, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| IndexerError::Config(format!("invalid RPC URL '{endpoint}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IndexerError::Config(format!(
                "RPC URL must be http(s), got '{}'",
                url.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            http,
            retry: RetryPolicy::new(config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<Value, IndexerError> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(req)
            .send()
            .await
            .map_err(|e| IndexerError::Connectivity(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("HTTP {}: {body}", status.as_u16());
            // Rate limiting and server faults are worth another attempt.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(IndexerError::Connectivity(msg))
            } else {
                Err(IndexerError::Other(msg))
            };
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Connectivity(format!("invalid JSON-RPC response: {e}")))?
            .into_result()
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying RPC request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(method, attempt, error = %e, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn latest_height(&self) -> Result<u64, IndexerError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        value
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| {
                IndexerError::Other(format!("unexpected eth_blockNumber result: {value}"))
            })
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let filter = logs_filter(from, to, addresses, topic0);
        let value = self.call("eth_getLogs", vec![filter]).await?;
        serde_json::from_value(value)
            .map_err(|e| IndexerError::Other(format!("unexpected eth_getLogs result: {e}")))
    }

    async fn transaction_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, IndexerError> {
        let hash = to_hex_0x(tx_hash.as_slice());
        let value = self
            .call("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let logs = value.get("logs").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(logs).map(Some).map_err(|e| {
            IndexerError::Other(format!("unexpected eth_getTransactionReceipt result: {e}"))
        })
    }
}
