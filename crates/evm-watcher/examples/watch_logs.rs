//! Example: watch a contract's logs and print one line per log.
//!
//! Progress is checkpointed under `--state-dir`, so stopping and restarting resumes
//! where the previous run left off. `ws://` / `wss://` URLs use the WebSocket
//! transport with keep-alive; anything else is plain HTTP.
//!
//! Usage:
//!
//!   cargo run -p evm-watcher --example watch_logs -- --rpc-url <URL> --address 0x... \
//!       [--address 0x...] [--event "Transfer(address,address,uint256)" | --topic 0x...] \
//!       [--start N] [--end N] [--batch N] [--buffer N] [--sleep-secs N] [--state-dir DIR]
//!
//! Set WATCHER_LOG_LEVEL=debug for per-window detail.

use evm_watcher::filter::{parse_address, parse_topic};
use evm_watcher::{
    event_topic, init_tracing, DiskStore, LogFilter, LogRecord, StoreCheckpoint, Topic, Watcher,
};
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "Usage: watch_logs --rpc-url URL --address 0xADDR [--address 0xADDR] \
                     [--event SIG | --topic 0xTOPIC] [--start N] [--end N] [--batch N] \
                     [--buffer N] [--sleep-secs N] [--state-dir DIR]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();
    let mut rpc_url = String::new();
    let mut addresses = Vec::new();
    let mut topic0: Option<[u8; 32]> = None;
    let mut start: Option<u64> = None;
    let mut end: Option<u64> = None;
    let mut batch: u64 = 10;
    let mut buffer: u64 = 0;
    let mut sleep_secs: u64 = 30;
    let mut state_dir = String::from(".watcher");
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned().unwrap_or_default();
        match args[i].as_str() {
            "--rpc-url" => rpc_url = value,
            "--address" => addresses.push(parse_address(&value)?),
            "--event" => topic0 = Some(event_topic(&value)),
            "--topic" => topic0 = Some(parse_topic(&value)?),
            "--start" => start = Some(value.parse()?),
            "--end" => end = Some(value.parse()?),
            "--batch" => batch = value.parse()?,
            "--buffer" => buffer = value.parse()?,
            "--sleep-secs" => sleep_secs = value.parse()?,
            "--state-dir" => state_dir = value,
            "--help" | "-h" => {
                eprintln!("{}", USAGE);
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument {}\n{}", other, USAGE);
                std::process::exit(1);
            }
        }
        i += 2;
    }
    if rpc_url.is_empty() || addresses.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let mut filter = LogFilter::new();
    for address in addresses {
        filter = filter.address(address);
    }
    if let Some(t) = topic0 {
        filter = filter.topic(Topic::Exact(t));
    }

    let store = Arc::new(DiskStore::new(&state_dir));
    let checkpoint = Arc::new(StoreCheckpoint::new(store, "watch_logs"));

    let mut builder = Watcher::builder()
        .url(rpc_url)
        .max_log_batch_size(batch)
        .buffer(buffer)
        .sleep_interval(Duration::from_secs(sleep_secs))
        .checkpoint(checkpoint)
        .on_complete(|| eprintln!("reached end block"))
        .on_disconnect(|reason| eprintln!("connection closed: {}", reason));
    if let Some(start) = start {
        builder = builder.start_block(start);
    }
    if let Some(end) = end {
        builder = builder.end_block(end);
    }
    let watcher = builder.connect().await?;

    let print = |log: LogRecord, is_new_block: bool| {
        if is_new_block {
            println!("-- block {}", log.block_number);
        }
        println!(
            "log block={} index={} tx={} address={} topics={}",
            log.block_number,
            log.log_index,
            log.transaction_hash().unwrap_or("-"),
            log.address().unwrap_or("-"),
            log.topics().join(",")
        );
        std::future::ready(Ok::<(), anyhow::Error>(()))
    };

    tokio::select! {
        res = watcher.run(filter, print) => res?,
        _ = tokio::signal::ctrl_c() => eprintln!("interrupted"),
    }
    Ok(())
}
