//! In-memory scan position of a running watcher.
//!
//! Lives only as long as the watcher; durable progress is the [crate::Checkpoint].

/// Where the next window starts and what this process last finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    /// First block not yet fully handled: the next window, or the block in flight
    /// when a pass stopped early. Once set, it wins over both the configured start
    /// block and the persisted checkpoint.
    pub next_start_block: Option<u64>,
    /// Mirror of the persisted checkpoint; seeded from it on the first pass.
    pub last_block_processed: Option<u64>,
}

impl ScanCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `safe_head` is already processed.
    pub fn at_head(&self, safe_head: u64) -> bool {
        self.last_block_processed == Some(safe_head)
    }
}
