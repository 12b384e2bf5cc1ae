//! Raw log entries as returned by eth_getLogs.
//!
//! Block number, log index and transaction index are normalized from hex quantities;
//! everything else (address, topics, data, hashes) is kept verbatim in `raw`.

use anyhow::{Context, Result};
use serde_json::Value;

/// One log entry from the node, with its ordering keys decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_index: u64,
    /// The untouched JSON-RPC log object.
    pub raw: Value,
}

impl LogRecord {
    /// Decode a JSON-RPC log object (eth_getLogs result item).
    pub fn from_value(raw: Value) -> Result<Self> {
        let block_number = quantity(&raw, "blockNumber")?;
        let log_index = quantity(&raw, "logIndex")?;
        let transaction_index = quantity(&raw, "transactionIndex")?;
        Ok(Self {
            block_number,
            log_index,
            transaction_index,
            raw,
        })
    }

    /// Emitting contract, as sent by the node.
    pub fn address(&self) -> Option<&str> {
        self.raw.get("address").and_then(|a| a.as_str())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.raw
            .get("topics")
            .and_then(|t| t.as_array())
            .map(|t| t.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn data(&self) -> Option<&str> {
        self.raw.get("data").and_then(|d| d.as_str())
    }

    pub fn transaction_hash(&self) -> Option<&str> {
        self.raw.get("transactionHash").and_then(|h| h.as_str())
    }
}

/// Quantities may come as hex strings (per JSON-RPC) or plain numbers (some mocks).
fn quantity(log: &Value, field: &'static str) -> Result<u64> {
    match log.get(field) {
        Some(Value::String(s)) => parse_hex_u64(s).with_context(|| format!("parse {}", field)),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("{} is not an unsigned integer", field)),
        _ => anyhow::bail!("Missing {}", field),
    }
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

pub(crate) fn to_hex_quantity(n: u64) -> String {
    format!("0x{:x}", n)
}
