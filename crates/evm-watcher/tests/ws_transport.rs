//! WebSocket transport against an in-process tungstenite server.

mod common;

use common::{Deliveries, RecordingCheckpoint};
use evm_watcher::{KeepAliveConfig, LogFilter, Transport, TransportError, Watcher, WsTransport};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy)]
enum Server {
    /// Answers eth_blockNumber with `head` and eth_getLogs with an empty list.
    Rpc { head: u64 },
    /// Completes the handshake, then never reads (so never pongs).
    Silent,
    /// Completes the handshake and closes with 1000 "bye".
    Closing,
}

async fn spawn_server(behavior: Server) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                match behavior {
                    Server::Rpc { head } => {
                        while let Some(Ok(msg)) = ws.next().await {
                            let Message::Text(text) = msg else { continue };
                            let req: Value = serde_json::from_str(&text).expect("request json");
                            let result = match req["method"].as_str() {
                                Some("eth_blockNumber") => json!(format!("0x{:x}", head)),
                                _ => json!([]),
                            };
                            // Unsolicited notification first; the client must skip it.
                            let note = json!({"jsonrpc": "2.0", "method": "eth_subscription", "params": {}});
                            let reply = json!({"jsonrpc": "2.0", "id": req["id"], "result": result});
                            if ws.send(Message::Text(note.to_string())).await.is_err()
                                || ws.send(Message::Text(reply.to_string())).await.is_err()
                            {
                                return;
                            }
                        }
                    }
                    Server::Silent => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        drop(ws);
                    }
                    Server::Closing => {
                        let _ = ws
                            .close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "bye".into(),
                            }))
                            .await;
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                }
            });
        }
    });
    format!("ws://{}", addr)
}

fn disconnect_probe() -> (oneshot::Receiver<String>, Box<dyn FnOnce(String) + Send>) {
    let (tx, rx) = oneshot::channel();
    (
        rx,
        Box::new(move |reason: String| {
            let _ = tx.send(reason);
        }),
    )
}

#[tokio::test]
async fn call_round_trip_skips_notifications() {
    let url = spawn_server(Server::Rpc { head: 42 }).await;
    let ws = WsTransport::connect(&url, &KeepAliveConfig::default(), None)
        .await
        .expect("connect");
    assert!(ws.is_streaming());
    assert_eq!(ws.block_number().await.expect("block number"), 42);
    assert_eq!(ws.block_number().await.expect("second call"), 42);

    ws.shutdown().await;
    assert!(ws.is_closed());
    assert!(matches!(ws.block_number().await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn unanswered_ping_terminates_connection() {
    let url = spawn_server(Server::Silent).await;
    let keepalive = KeepAliveConfig {
        check_interval: Duration::from_millis(100),
        expected_pong_back: Duration::from_millis(200),
    };
    let (reason, on_disconnect) = disconnect_probe();
    let ws = WsTransport::connect(&url, &keepalive, Some(on_disconnect))
        .await
        .expect("connect");

    let reason = tokio::time::timeout(Duration::from_secs(5), reason)
        .await
        .expect("disconnect within timeout")
        .expect("disconnect callback ran");
    assert!(reason.starts_with("terminated"), "reason: {}", reason);
    assert!(ws.is_closed());
    assert!(matches!(
        ws.raw_call("eth_chainId", json!([])).await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn peer_close_reports_code_and_reason() {
    let url = spawn_server(Server::Closing).await;
    let (reason, on_disconnect) = disconnect_probe();
    let ws = WsTransport::connect(&url, &KeepAliveConfig::default(), Some(on_disconnect))
        .await
        .expect("connect");

    let reason = tokio::time::timeout(Duration::from_secs(5), reason)
        .await
        .expect("disconnect within timeout")
        .expect("disconnect callback ran");
    assert_eq!(reason, "1000: bye");
    assert!(ws.is_closed());
}

#[tokio::test]
async fn watcher_over_websocket_runs_to_end_block() {
    let url = spawn_server(Server::Rpc { head: 25 }).await;
    let checkpoint = Arc::new(RecordingCheckpoint::new());
    let watcher = Watcher::builder()
        .url(url)
        .start_block(0)
        .end_block(20)
        .checkpoint(checkpoint.clone())
        .connect()
        .await
        .expect("connect watcher");

    tokio::time::timeout(
        Duration::from_secs(5),
        watcher.run(LogFilter::new(), Deliveries::default().handler()),
    )
    .await
    .expect("finishes")
    .expect("run");
    assert_eq!(checkpoint.writes(), vec![9, 19, 20]);
}

#[tokio::test]
async fn dropping_transport_closes_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        let mut saw_close = false;
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) => saw_close = true,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = closed_tx.send(saw_close);
    });

    let ws = WsTransport::connect(&url, &KeepAliveConfig::default(), None)
        .await
        .expect("connect");
    drop(ws);

    let saw_close = tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("server sees the connection end")
        .expect("server task finished");
    assert!(saw_close, "expected a close frame from the client");
}
