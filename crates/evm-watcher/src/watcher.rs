//! Watcher: resumable, windowed eth_getLogs scanning in strict block order.
//!
//! Each pass asks the node for its head, reads the checkpoint, and walks
//! `[start, min(end, head - buffer)]` in windows of at most `max_log_batch_size`
//! blocks. Logs are handed to the [LogHandler] in node order with a flag marking
//! the first log of each block. Progress is checkpointed at every block boundary
//! (`block - 1`) and after every window (`window_end`, even if it had no logs), so
//! a restart re-delivers at most the block that was in flight.
//!
//! Between passes the watcher sleeps for `sleep_interval`. With a finite
//! `end_block` it stops once that block is processed. There is no retry: the first
//! error tears down a streaming transport, is reported to `on_error`, and ends `run`.

use crate::aggregator::BlockTimer;
use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::{ConfigError, KeepAliveConfig, TransportMode, WatcherConfig};
use crate::cursor::ScanCursor;
use crate::filter::LogFilter;
use crate::log_record::LogRecord;
use crate::transport::{connect, ConnectError, Transport, TransportError};
use crate::ws::Disconnect;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("log handler failed: {0:#}")]
    Callback(anyhow::Error),
}

impl From<ConnectError> for WatcherError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Config(e) => WatcherError::Config(e),
            ConnectError::Transport(e) => WatcherError::Transport(e),
        }
    }
}

/// Per-log processing. Returning `Err` aborts the pass; the block in flight is
/// not checkpointed and will be delivered again after a restart.
#[async_trait]
pub trait LogHandler: Send {
    async fn handle(&mut self, log: LogRecord, is_new_block: bool) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> LogHandler for F
where
    F: FnMut(LogRecord, bool) -> Fut + Send,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&mut self, log: LogRecord, is_new_block: bool) -> anyhow::Result<()> {
        (self)(log, is_new_block).await
    }
}

type OnError = Box<dyn FnOnce(&WatcherError) + Send>;
type OnComplete = Box<dyn FnOnce() + Send>;

/// Builder for the watcher.
pub struct WatcherBuilder {
    config: WatcherConfig,
    url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    checkpoint: Option<Arc<dyn Checkpoint>>,
    on_error: Option<OnError>,
    on_complete: Option<OnComplete>,
    on_disconnect: Option<Disconnect>,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
            url: None,
            transport: None,
            checkpoint: None,
            on_error: None,
            on_complete: None,
            on_disconnect: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = Some(block);
        self
    }

    pub fn end_block(mut self, block: u64) -> Self {
        self.config.end_block = Some(block);
        self
    }

    pub fn max_log_batch_size(mut self, n: u64) -> Self {
        self.config.max_log_batch_size = n;
        self
    }

    pub fn sleep_interval(mut self, d: Duration) -> Self {
        self.config.sleep_interval = d;
        self
    }

    pub fn buffer(mut self, blocks: u64) -> Self {
        self.config.buffer = blocks;
        self
    }

    pub fn keepalive(mut self, keepalive: KeepAliveConfig) -> Self {
        self.config.keepalive = keepalive;
        self
    }

    /// RPC endpoint; the transport mode follows the URL scheme.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.config.mode = TransportMode::from_url(&url);
        self.url = Some(url);
        self
    }

    /// Use an already-built transport instead of a URL.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn checkpoint(mut self, checkpoint: Arc<dyn Checkpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Called once with the error that stopped the watcher.
    pub fn on_error(mut self, f: impl FnOnce(&WatcherError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called once when a finite `end_block` has been processed.
    pub fn on_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called once if the WebSocket connection closes. Only used by [Self::connect].
    pub fn on_disconnect(mut self, f: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    /// Build with the transport given to [Self::transport].
    pub fn build(self) -> Result<Watcher, WatcherError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(ConfigError::MissingUrl)?;
        let checkpoint = self.checkpoint.ok_or(ConfigError::MissingCheckpoint)?;
        Ok(Watcher {
            config: self.config,
            transport,
            checkpoint,
            cursor: ScanCursor::new(),
            timer: BlockTimer::new(),
            on_error: self.on_error,
            on_complete: self.on_complete,
        })
    }

    /// Validate, open the transport from [Self::url] (unless one was given), and build.
    pub async fn connect(mut self) -> Result<Watcher, WatcherError> {
        self.config.validate()?;
        if self.checkpoint.is_none() {
            return Err(ConfigError::MissingCheckpoint.into());
        }
        if self.transport.is_none() {
            let url = self.url.take().ok_or(ConfigError::MissingUrl)?;
            let transport = connect(
                &url,
                self.config.mode,
                &self.config.keepalive,
                self.on_disconnect.take(),
            )
            .await?;
            self.transport = Some(transport);
        }
        self.build()
    }
}

impl Default for WatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the chain for logs matching a filter; see the module docs.
pub struct Watcher {
    config: WatcherConfig,
    transport: Arc<dyn Transport>,
    checkpoint: Arc<dyn Checkpoint>,
    cursor: ScanCursor,
    timer: BlockTimer,
    on_error: Option<OnError>,
    on_complete: Option<OnComplete>,
}

impl Watcher {
    pub fn builder() -> WatcherBuilder {
        WatcherBuilder::new()
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// Scan until `end_block` is processed (or forever without one).
    ///
    /// Returns the error that stopped the watcher after passing it to `on_error`.
    pub async fn run<H: LogHandler>(
        mut self,
        filter: LogFilter,
        mut handler: H,
    ) -> Result<(), WatcherError> {
        loop {
            let next = match self.scan(&filter, &mut handler).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "watcher stopped");
                    self.teardown().await;
                    if let Some(f) = self.on_error.take() {
                        f(&e);
                    }
                    return Err(e);
                }
            };
            if let Some(end) = self.config.end_block {
                if next > end {
                    self.teardown().await;
                    tracing::info!(end_block = end, "done");
                    if let Some(f) = self.on_complete.take() {
                        f();
                    }
                    return Ok(());
                }
            }
            tracing::info!(
                sleep_ms = self.config.sleep_interval.as_millis() as u64,
                "reached latest block, sleeping"
            );
            tokio::time::sleep(self.config.sleep_interval).await;
        }
    }

    async fn teardown(&mut self) {
        if self.transport.is_streaming() {
            self.transport.shutdown().await;
        }
    }

    /// One pass from the current position up to the buffered head.
    /// Returns the first block not yet scanned.
    pub async fn scan<H: LogHandler>(
        &mut self,
        filter: &LogFilter,
        handler: &mut H,
    ) -> Result<u64, WatcherError> {
        tracing::debug!("new scan pass");
        let head = self.transport.block_number().await?;
        tracing::info!(head, "latest block");
        let Some(safe_head) = head.checked_sub(self.config.buffer) else {
            tracing::info!(buffer = self.config.buffer, "chain head is within the buffer, nothing to scan");
            return Ok(self
                .cursor
                .next_start_block
                .or(self.config.start_block)
                .unwrap_or(0));
        };
        if self.config.buffer > 0 {
            tracing::info!(buffer = self.config.buffer, safe_head, "latest block with buffer");
        }

        let nominal = self
            .cursor
            .next_start_block
            .or(self.config.start_block)
            .unwrap_or(safe_head);
        let state = self
            .checkpoint
            .worker_state(nominal, self.config.end_block)
            .await?;
        if self.cursor.last_block_processed.is_none() {
            self.cursor.last_block_processed = state.last_block_processed;
        }
        let mut start = nominal;
        if self.cursor.next_start_block.is_none() {
            if let Some(last) = state.last_block_processed {
                if last != nominal {
                    tracing::info!(last_block_processed = last, "fast-forwarding to last processed block");
                    start = last.checked_add(1).ok_or_else(|| CheckpointError::Corrupt {
                        key: "lastBlockProcessed".to_string(),
                        value: last.to_string(),
                    })?;
                }
            }
        }

        if self.cursor.at_head(safe_head) {
            tracing::info!("no new blocks");
            return Ok(start.max(safe_head.saturating_add(1)));
        }

        let ceiling = match self.config.end_block {
            Some(end) => end.min(safe_head),
            None => safe_head,
        };
        while start <= ceiling {
            let width = self.config.max_log_batch_size.min(ceiling - start + 1);
            let window_end = start + width - 1;
            tracing::info!(from = start, to = window_end, span = width, "requesting log span");
            self.cursor.next_start_block = Some(start);
            let logs = self.transport.get_logs(filter, start, window_end).await?;
            tracing::info!(count = logs.len(), "log count");

            self.timer.reset();
            for log in logs {
                let timing = self.timer.observe(log.block_number);
                if timing.is_boundary {
                    if let Some(block) = timing.completed {
                        tracing::info!(
                            block,
                            elapsed_ms = timing.elapsed_ms,
                            average_ms = timing.average_ms,
                            "benchmark"
                        );
                    }
                    if let Some(finished) = log.block_number.checked_sub(1) {
                        self.checkpoint.set_last_block_processed(finished).await?;
                        self.cursor.last_block_processed = Some(finished);
                        self.cursor.next_start_block = Some(log.block_number);
                    }
                }
                handler
                    .handle(log, timing.is_boundary)
                    .await
                    .map_err(WatcherError::Callback)?;
            }

            self.checkpoint.set_last_block_processed(window_end).await?;
            self.cursor.last_block_processed = Some(window_end);
            start = window_end + 1;
            self.cursor.next_start_block = Some(start);
        }
        Ok(start)
    }
}
