//! Block-time aggregator.
//!
//! Turns the block numbers of a window's logs (non-decreasing, repeating) into
//! "block completed" signals with timing. One instance per scan window: call
//! [BlockTimer::reset] before feeding a new window.

use tokio::time::Instant;

/// Result of one [BlockTimer::observe] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTiming {
    /// True on the first log of a block (first call after reset, or block number changed).
    pub is_boundary: bool,
    /// Block whose processing just finished, if a previous block was being timed.
    pub completed: Option<u64>,
    /// Time spent on `completed`, in milliseconds. Zero when nothing completed.
    pub elapsed_ms: f64,
    /// Cumulative mean of completed block times since the last reset.
    pub average_ms: f64,
}

#[derive(Debug, Default)]
pub struct BlockTimer {
    last_seen_block: Option<u64>,
    pending_since: Option<Instant>,
    running_average_ms: f64,
    sample_count: u64,
}

impl BlockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the current block and all statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn average_ms(&self) -> f64 {
        self.running_average_ms
    }

    pub fn observe(&mut self, block_number: u64) -> BlockTiming {
        let now = Instant::now();
        match self.last_seen_block {
            None => {
                self.last_seen_block = Some(block_number);
                self.pending_since = Some(now);
                BlockTiming {
                    is_boundary: true,
                    completed: None,
                    elapsed_ms: 0.0,
                    average_ms: 0.0,
                }
            }
            Some(current) if current == block_number => BlockTiming {
                is_boundary: false,
                completed: None,
                elapsed_ms: 0.0,
                average_ms: self.running_average_ms,
            },
            Some(current) => {
                let started = self.pending_since.unwrap_or(now);
                let elapsed_ms = now.duration_since(started).as_secs_f64() * 1_000.0;
                let count = self.sample_count as f64;
                self.running_average_ms =
                    (self.running_average_ms * count + elapsed_ms) / (count + 1.0);
                self.sample_count += 1;
                self.last_seen_block = Some(block_number);
                self.pending_since = Some(now);
                BlockTiming {
                    is_boundary: true,
                    completed: Some(current),
                    elapsed_ms,
                    average_ms: self.running_average_ms,
                }
            }
        }
    }
}
