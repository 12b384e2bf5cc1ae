//! JSON-RPC transports.
//!
//! The watcher only needs two primitives: the current block number and a raw
//! JSON-RPC call (used for eth_getLogs so multi-address filters reach the node
//! untouched). [HttpTransport] is stateless request/response; the streaming
//! variant lives in [crate::ws].

use crate::config::{validate_url, ConfigError, KeepAliveConfig, TransportMode};
use crate::filter::{build_logs_filter, LogFilter};
use crate::log_record::{parse_hex_u64, LogRecord};
use crate::ws::{Disconnect, WsTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(e))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Raw JSON-RPC call; returns the `result` member.
    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// eth_blockNumber.
    async fn block_number(&self) -> Result<u64, TransportError> {
        let result = self.raw_call("eth_blockNumber", json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| TransportError::Decode("blockNumber not string".into()))?;
        parse_hex_u64(s).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// eth_getLogs for `[from_block, to_block]`, in the order the node returned them.
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, TransportError> {
        let params = json!([build_logs_filter(filter, from_block, to_block)]);
        let result = self.raw_call("eth_getLogs", params).await?;
        let arr = result
            .as_array()
            .ok_or_else(|| TransportError::Decode("getLogs not array".into()))?;
        arr.iter()
            .cloned()
            .map(|v| LogRecord::from_value(v).map_err(|e| TransportError::Decode(e.to_string())))
            .collect()
    }

    /// Tear the connection down. No-op for stateless transports.
    async fn shutdown(&self) {}

    /// True if the transport holds a long-lived connection.
    fn is_streaming(&self) -> bool {
        false
    }
}

/// Unwrap a JSON-RPC response envelope.
pub(crate) fn rpc_result(mut response: Value) -> Result<Value, TransportError> {
    if let Some(err) = response.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(TransportError::Rpc { code, message });
    }
    response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| TransportError::Decode("Missing result".into()))
}

/// JSON-RPC over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let resp = resp.error_for_status()?;
        let json: Value = resp.json().await?;
        rpc_result(json)
    }
}

/// Open a transport for `url`. WebSocket connections are supervised by the
/// keep-alive monitor; `on_disconnect` runs once when that connection closes.
pub async fn connect(
    url: &str,
    mode: TransportMode,
    keepalive: &KeepAliveConfig,
    on_disconnect: Option<Disconnect>,
) -> Result<Arc<dyn Transport>, ConnectError> {
    validate_url(url, mode)?;
    tracing::info!(url, ?mode, "network");
    match mode {
        TransportMode::Http => Ok(Arc::new(HttpTransport::new(url)?)),
        TransportMode::WebSocket => {
            Ok(Arc::new(WsTransport::connect(url, keepalive, on_disconnect).await?))
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
