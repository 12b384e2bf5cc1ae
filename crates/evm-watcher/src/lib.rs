//! Resumable log scanning for EVM chains.
//!
//! - **Watcher**: walks the chain in bounded eth_getLogs windows, in strict block
//!   order, checkpointing progress so restarts resume without skipping blocks
//!   (at-least-once per block).
//! - **BlockTimer**: turns the block numbers of a window's logs into per-block
//!   boundary signals with timing.
//! - **KeepAlive**: ping/pong supervision that severs silently-dead WebSocket
//!   connections.
//! - **ObjectStore / Checkpoint / History**: bring-your-own state, with
//!   filesystem and in-memory stores included.

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod filter;
pub mod history;
pub mod keepalive;
pub mod log_record;
pub mod logging;
pub mod store;
pub mod transport;
pub mod watcher;
pub mod ws;

pub use aggregator::{BlockTimer, BlockTiming};
pub use checkpoint::{Checkpoint, CheckpointError, StoreCheckpoint, WorkerState};
pub use config::{ConfigError, KeepAliveConfig, TransportMode, WatcherConfig};
pub use cursor::ScanCursor;
pub use filter::{event_topic, LogFilter, Topic};
pub use history::{History, HistoryError, HistoryRecord, Mode};
pub use keepalive::{KeepAlive, SocketControl, SocketEvent};
pub use log_record::LogRecord;
pub use logging::init_tracing;
pub use store::{DiskStore, MemoryStore, ObjectStore, StoreError};
pub use transport::{connect, ConnectError, HttpTransport, Transport, TransportError};
pub use watcher::{LogHandler, Watcher, WatcherBuilder, WatcherError};
pub use ws::{Disconnect, WsTransport};
