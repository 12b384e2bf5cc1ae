//! Watcher configuration.

use std::time::Duration;
use thiserror::Error;

/// How the watcher talks to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Plain JSON-RPC over HTTP (request/response).
    #[default]
    Http,
    /// JSON-RPC over a long-lived WebSocket, supervised by the keep-alive monitor.
    WebSocket,
}

impl TransportMode {
    /// WebSocket for `ws://` / `wss://` URLs, HTTP otherwise.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            TransportMode::WebSocket
        } else {
            TransportMode::Http
        }
    }
}

/// Watcher configuration. Immutable once the watcher is built.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// First block to scan. `None` starts at the (buffered) chain head.
    pub start_block: Option<u64>,
    /// Last block to scan (inclusive). `None` runs forever.
    pub end_block: Option<u64>,
    /// Max block range per eth_getLogs request.
    pub max_log_batch_size: u64,
    /// Time to sleep once the scan has caught up with the head.
    pub sleep_interval: Duration,
    /// Number of blocks to stay behind the chain head.
    pub buffer: u64,
    /// Transport used to reach the node.
    pub mode: TransportMode,
    /// Ping/pong supervision for [TransportMode::WebSocket].
    pub keepalive: KeepAliveConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            start_block: None,
            end_block: None,
            max_log_batch_size: 10,
            sleep_interval: Duration::from_secs(30),
            buffer: 0,
            mode: TransportMode::Http,
            keepalive: KeepAliveConfig::default(),
        }
    }
}

/// Keep-alive timing for streaming connections.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Interval between pings once the connection is open.
    pub check_interval: Duration,
    /// How long to wait for a pong before severing the connection.
    pub expected_pong_back: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(7_500),
            expected_pong_back: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_log_batch_size must be greater than 0")]
    ZeroBatchSize,
    #[error("sleep_interval must be greater than 0")]
    ZeroSleepInterval,
    #[error("start_block {start} is after end_block {end}")]
    StartAfterEnd { start: u64, end: u64 },
    #[error("keep-alive check_interval and expected_pong_back must be greater than 0")]
    ZeroKeepAlive,
    #[error("invalid RPC url: {0}")]
    InvalidUrl(String),
    #[error("an RPC url or a transport is required")]
    MissingUrl,
    #[error("a checkpoint is required")]
    MissingCheckpoint,
}

impl WatcherConfig {
    /// Check every invariant up front so a bad value never reaches the loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_log_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.sleep_interval.is_zero() {
            return Err(ConfigError::ZeroSleepInterval);
        }
        if let (Some(start), Some(end)) = (self.start_block, self.end_block) {
            if start > end {
                return Err(ConfigError::StartAfterEnd { start, end });
            }
        }
        if self.keepalive.check_interval.is_zero() || self.keepalive.expected_pong_back.is_zero() {
            return Err(ConfigError::ZeroKeepAlive);
        }
        Ok(())
    }
}

/// Validate an RPC url against the configured transport mode.
pub fn validate_url(url: &str, mode: TransportMode) -> Result<(), ConfigError> {
    let ok = match mode {
        TransportMode::Http => url.starts_with("http://") || url.starts_with("https://"),
        TransportMode::WebSocket => url.starts_with("ws://") || url.starts_with("wss://"),
    };
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}
