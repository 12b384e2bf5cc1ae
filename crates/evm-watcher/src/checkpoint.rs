//! Durable scan progress.
//!
//! The watcher reads [WorkerState] once per pass and records the last fully
//! processed block after every window and every block boundary, so a restarted
//! watcher resumes where the last one stopped.

use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Persisted progress of one watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_log_batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_processed: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("corrupt checkpoint at {key}: {value:?}")]
    Corrupt { key: String, value: String },
}

/// Where the watcher reads and records its progress.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// Current state for a scan nominally starting at `start_block`.
    async fn worker_state(
        &self,
        start_block: u64,
        end_block: Option<u64>,
    ) -> Result<WorkerState, CheckpointError>;

    /// Record `block` as fully processed. Must not return before the write is durable.
    async fn set_last_block_processed(&self, block: u64) -> Result<(), CheckpointError>;
}

pub const LAST_BLOCK_KEY: &str = "LAST_BLOCK";

/// [Checkpoint] over an [ObjectStore]: the last processed block is a stringified
/// integer at `<namespace>/LAST_BLOCK` (or `LAST_BLOCK` with an empty namespace).
#[derive(Clone)]
pub struct StoreCheckpoint {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl StoreCheckpoint {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: &str) -> Self {
        let key = if namespace.is_empty() {
            LAST_BLOCK_KEY.to_string()
        } else {
            format!("{}/{}", namespace.trim_end_matches('/'), LAST_BLOCK_KEY)
        };
        Self { store, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last processed block, `None` if nothing was recorded yet.
    pub async fn last_block_processed(&self) -> Result<Option<u64>, CheckpointError> {
        let bytes = match self.store.read(&self.key).await {
            Ok(b) => b,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        match text.trim().parse::<u64>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(CheckpointError::Corrupt {
                key: self.key.clone(),
                value: text.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Checkpoint for StoreCheckpoint {
    async fn worker_state(
        &self,
        start_block: u64,
        end_block: Option<u64>,
    ) -> Result<WorkerState, CheckpointError> {
        Ok(WorkerState {
            start_block: Some(start_block),
            end_block,
            max_log_batch_size: None,
            last_block_processed: self.last_block_processed().await?,
        })
    }

    async fn set_last_block_processed(&self, block: u64) -> Result<(), CheckpointError> {
        self.store
            .write(&self.key, block.to_string().as_bytes())
            .await?;
        Ok(())
    }
}
