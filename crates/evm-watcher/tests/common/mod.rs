//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use async_trait::async_trait;
use evm_watcher::{
    Checkpoint, CheckpointError, LogRecord, MemoryStore, StoreCheckpoint, Transport,
    TransportError, WorkerState,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Install a test subscriber once (honours RUST_LOG).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A JSON-RPC log as a node returns it: hex quantities, opaque payload.
pub fn raw_log(block: u64, log_index: u64) -> Value {
    json!({
        "address": "0x8ab5919fad5c55faf73342f52c5baa4dfe1be760",
        "blockNumber": format!("0x{:x}", block),
        "logIndex": format!("0x{:x}", log_index),
        "transactionIndex": "0x0",
        "transactionHash": format!("0x{:064x}", block * 1_000 + log_index),
        "topics": ["0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62"],
        "data": "0x",
    })
}

/// Scripted node: fixed log set, movable head, records every eth_getLogs window.
pub struct MockChain {
    head: AtomicU64,
    logs: Vec<Value>,
    pub windows: Mutex<Vec<(u64, u64)>>,
    pub filters: Mutex<Vec<Value>>,
    pub head_queries: AtomicU64,
    /// Fail eth_getLogs with an RPC error on this (0-based) call.
    fail_get_logs_on: Option<usize>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Vec::new(),
            windows: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            head_queries: AtomicU64::new(0),
            fail_get_logs_on: None,
        }
    }

    /// Logs must be given in (block, log_index) order, as a node would return them.
    pub fn with_logs(mut self, logs: Vec<Value>) -> Self {
        self.logs = logs;
        self
    }

    pub fn failing_get_logs_on(mut self, call: usize) -> Self {
        self.fail_get_logs_on = Some(call);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn windows(&self) -> Vec<(u64, u64)> {
        self.windows.lock().unwrap().clone()
    }

    fn block_of(log: &Value) -> u64 {
        let s = log["blockNumber"].as_str().unwrap_or("0x0");
        u64::from_str_radix(s.trim_start_matches("0x"), 16).unwrap_or(0)
    }
}

fn hex_param(filter: &Value, key: &str) -> Result<u64, TransportError> {
    let s = filter[key]
        .as_str()
        .ok_or_else(|| TransportError::Decode(format!("{} missing", key)))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl Transport for MockChain {
    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        match method {
            "eth_blockNumber" => {
                self.head_queries.fetch_add(1, Ordering::SeqCst);
                Ok(json!(format!("0x{:x}", self.head.load(Ordering::SeqCst))))
            }
            "eth_getLogs" => {
                let filter = params[0].clone();
                let from = hex_param(&filter, "fromBlock")?;
                let to = hex_param(&filter, "toBlock")?;
                let call = {
                    let mut windows = self.windows.lock().unwrap();
                    windows.push((from, to));
                    windows.len() - 1
                };
                self.filters.lock().unwrap().push(filter);
                if self.fail_get_logs_on == Some(call) {
                    return Err(TransportError::Rpc {
                        code: -32000,
                        message: "upstream unavailable".into(),
                    });
                }
                let logs: Vec<Value> = self
                    .logs
                    .iter()
                    .filter(|l| (from..=to).contains(&Self::block_of(l)))
                    .cloned()
                    .collect();
                Ok(Value::Array(logs))
            }
            other => Err(TransportError::Rpc {
                code: -32601,
                message: format!("method {} not found", other),
            }),
        }
    }
}

/// Checkpoint backed by a [MemoryStore] that also remembers every write, in order.
pub struct RecordingCheckpoint {
    inner: StoreCheckpoint,
    pub writes: Mutex<Vec<u64>>,
}

impl RecordingCheckpoint {
    pub fn new() -> Self {
        Self {
            inner: StoreCheckpoint::new(Arc::new(MemoryStore::new()), "test"),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub async fn seeded(last_block_processed: u64) -> Self {
        let cp = Self::new();
        cp.inner
            .set_last_block_processed(last_block_processed)
            .await
            .expect("seed checkpoint");
        cp
    }

    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }

    pub async fn last(&self) -> Option<u64> {
        self.inner.last_block_processed().await.expect("read checkpoint")
    }
}

#[async_trait]
impl Checkpoint for RecordingCheckpoint {
    async fn worker_state(
        &self,
        start_block: u64,
        end_block: Option<u64>,
    ) -> Result<WorkerState, CheckpointError> {
        self.inner.worker_state(start_block, end_block).await
    }

    async fn set_last_block_processed(&self, block: u64) -> Result<(), CheckpointError> {
        self.writes.lock().unwrap().push(block);
        self.inner.set_last_block_processed(block).await
    }
}

/// Collects (block, log_index, is_new_block) for every delivered log.
#[derive(Clone, Default)]
pub struct Deliveries(pub Arc<Mutex<Vec<(u64, u64, bool)>>>);

impl Deliveries {
    pub fn handler(
        &self,
    ) -> impl FnMut(LogRecord, bool) -> std::future::Ready<anyhow::Result<()>> + Send + 'static {
        let seen = self.0.clone();
        move |log: LogRecord, is_new_block: bool| {
            seen.lock()
                .unwrap()
                .push((log.block_number, log.log_index, is_new_block));
            std::future::ready(Ok(()))
        }
    }

    pub fn all(&self) -> Vec<(u64, u64, bool)> {
        self.0.lock().unwrap().clone()
    }

    pub fn blocks(&self) -> Vec<u64> {
        self.all().into_iter().map(|(b, _, _)| b).collect()
    }
}
