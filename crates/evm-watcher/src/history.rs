//! Per-address transfer history kept next to the checkpoint.
//!
//! History for `address` lives at `history/<address>`, either as a JSON snapshot
//! ([History::write]) or as `mode;tx;amount;address` lines ([History::append]).
//! [History::read] understands both, including a snapshot followed by appended lines.

use crate::checkpoint::{Checkpoint, CheckpointError, StoreCheckpoint};
use crate::store::{ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::In => f.write_str("IN"),
            Mode::Out => f.write_str("OUT"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Mode::In),
            "OUT" => Ok(Mode::Out),
            other => Err(format!("unknown mode {:?}", other)),
        }
    }
}

/// One movement of value for a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub mode: Mode,
    pub tx: String,
    /// Decimal amount as a string (token amounts overflow u64).
    pub amount: String,
    pub address: String,
}

impl HistoryRecord {
    fn to_line(&self) -> String {
        format!("{};{};{};{}", self.mode, self.tx, self.amount, self.address)
    }

    fn from_line(line: &str) -> Option<Self> {
        let mut parts = line.split(';');
        let mode = parts.next()?.parse().ok()?;
        let tx = parts.next()?.to_string();
        let amount = parts.next()?.to_string();
        let address = parts.next()?.to_string();
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            mode,
            tx,
            amount,
            address,
        })
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("history JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed history line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },
}

/// History and last-block bookkeeping over any [ObjectStore].
#[derive(Clone)]
pub struct History {
    store: Arc<dyn ObjectStore>,
    last_block: StoreCheckpoint,
}

impl History {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let last_block = StoreCheckpoint::new(store.clone(), "");
        Self { store, last_block }
    }

    fn key(address: &str) -> String {
        format!("history/{}", address)
    }

    /// Append records as `mode;tx;amount;address` lines. Creates the object if missing.
    pub async fn append(&self, address: &str, records: &[HistoryRecord]) -> Result<(), HistoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for r in records {
            body.push_str(&r.to_line());
            body.push('\n');
        }
        self.store.append(&Self::key(address), body.as_bytes()).await?;
        Ok(())
    }

    /// Replace the history with a pretty-printed JSON snapshot.
    pub async fn write(&self, address: &str, records: &[HistoryRecord]) -> Result<(), HistoryError> {
        let body = serde_json::to_vec_pretty(records)?;
        self.store.write(&Self::key(address), &body).await?;
        Ok(())
    }

    /// Full ordered history; empty when nothing was written yet.
    pub async fn read(&self, address: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
        let bytes = match self.store.read(&Self::key(address)).await {
            Ok(b) => b,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(address, "no history yet, defaulting to empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        parse_history(&String::from_utf8_lossy(&bytes))
    }

    /// Last block recorded under `LAST_BLOCK`, 0 when absent.
    pub async fn latest_block(&self) -> Result<u64, HistoryError> {
        Ok(self.last_block.last_block_processed().await?.unwrap_or(0))
    }

    pub async fn set_last_block(&self, block: u64) -> Result<(), HistoryError> {
        self.last_block.set_last_block_processed(block).await?;
        Ok(())
    }
}

fn parse_history(text: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
    let mut records = Vec::new();
    let mut rest = text;
    if text.trim_start().starts_with('[') {
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Vec<HistoryRecord>>();
        if let Some(snapshot) = stream.next() {
            records.extend(snapshot?);
        }
        rest = &text[stream.byte_offset()..];
    }
    for (i, line) in rest.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = HistoryRecord::from_line(line).ok_or_else(|| HistoryError::MalformedLine {
            line: i + 1,
            content: line.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}
