//! Log filters for eth_getLogs.
//!
//! The filter is sent to the node as-is: a list of contract addresses and positional
//! topic patterns. Nothing is filtered client-side.

use crate::log_record::to_hex_quantity;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};

/// One positional topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Matches anything (`null`).
    Any,
    /// Matches exactly this 32-byte topic.
    Exact([u8; 32]),
    /// Matches any of these topics.
    AnyOf(Vec<[u8; 32]>),
}

impl Topic {
    fn to_json(&self) -> Value {
        match self {
            Topic::Any => Value::Null,
            Topic::Exact(t) => Value::String(format!("0x{}", hex::encode(t))),
            Topic::AnyOf(ts) => Value::Array(
                ts.iter()
                    .map(|t| Value::String(format!("0x{}", hex::encode(t))))
                    .collect(),
            ),
        }
    }
}

/// Address/topic filter; block bounds are added per window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<[u8; 20]>,
    pub topics: Vec<Topic>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: [u8; 20]) -> Self {
        self.addresses.push(address);
        self
    }

    pub fn topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }
}

/// keccak256 of an event signature, e.g. `Transfer(address,address,uint256)`.
pub fn event_topic(signature: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(signature.as_bytes()));
    out
}

/// Parse a 20-byte hex address (with or without `0x`).
pub fn parse_address(s: &str) -> anyhow::Result<[u8; 20]> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
    if bytes.len() != 20 {
        anyhow::bail!("address must be 20 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parse a 32-byte hex topic (with or without `0x`).
pub fn parse_topic(s: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
    if bytes.len() != 32 {
        anyhow::bail!("topic must be 32 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Build the eth_getLogs parameter object for `[from_block, to_block]`.
pub fn build_logs_filter(filter: &LogFilter, from_block: u64, to_block: u64) -> Value {
    let mut out = json!({
        "fromBlock": to_hex_quantity(from_block),
        "toBlock": to_hex_quantity(to_block),
    });
    match filter.addresses.as_slice() {
        [] => {}
        [single] => out["address"] = Value::String(format!("0x{}", hex::encode(single))),
        many => {
            out["address"] = Value::Array(
                many.iter()
                    .map(|a| Value::String(format!("0x{}", hex::encode(a))))
                    .collect(),
            )
        }
    }
    if !filter.topics.is_empty() {
        out["topics"] = Value::Array(filter.topics.iter().map(Topic::to_json).collect());
    }
    out
}
