//! JSON-RPC over a WebSocket, supervised by the keep-alive monitor.
//!
//! One I/O task owns the socket. Calls are correlated with responses by request id;
//! subscription notifications and other unsolicited frames are ignored. Once the
//! socket closes (remotely, on error, or because the monitor severed it) every
//! pending and future call fails with [TransportError::Closed].

use crate::config::KeepAliveConfig;
use crate::keepalive::{KeepAlive, SocketControl, SocketEvent};
use crate::transport::{rpc_result, Transport, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Called once with the close reason when the connection goes away.
pub type Disconnect = Box<dyn FnOnce(String) + Send + 'static>;

type Reply = oneshot::Sender<Result<Value, TransportError>>;

enum Command {
    Call { id: u64, body: String, reply: Reply },
    Ping,
    Terminate,
    Close,
}

struct WsControl(mpsc::UnboundedSender<Command>);

impl SocketControl for WsControl {
    fn ping(&self) {
        let _ = self.0.send(Command::Ping);
    }

    fn terminate(&self) {
        let _ = self.0.send(Command::Terminate);
    }
}

pub struct WsTransport {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl WsTransport {
    /// Connect and start the keep-alive monitor. Without `on_disconnect`, a close is
    /// logged at error level and the transport fails fast from then on.
    pub async fn connect(
        url: &str,
        keepalive: &KeepAliveConfig,
        on_disconnect: Option<Disconnect>,
    ) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url).await?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let closed_flag = Arc::clone(&closed);
        KeepAlive::new(keepalive.clone()).spawn(
            WsControl(cmd_tx.clone()),
            event_rx,
            move |reason: String| {
                closed_flag.store(true, Ordering::SeqCst);
                match on_disconnect {
                    Some(f) => f(reason),
                    None => tracing::error!(reason = %reason, "websocket connection closed"),
                }
            },
        );
        let _ = event_tx.send(SocketEvent::Open);
        tokio::spawn(io_loop(stream, cmd_rx, event_tx));

        Ok(Self {
            commands: cmd_tx,
            next_id: AtomicU64::new(1),
            closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn raw_call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        })
        .to_string();
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call { id, body, reply })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)?
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
        }
    }

    fn is_streaming(&self) -> bool {
        true
    }
}

async fn io_loop(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let (mut sink, mut source) = stream.split();
    let mut pending: HashMap<u64, Reply> = HashMap::new();

    let reason = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Call { id, body, reply }) => {
                    if let Err(e) = sink.send(Message::Text(body)).await {
                        let reason = format!("send failed: {}", e);
                        let _ = reply.send(Err(e.into()));
                        break reason;
                    }
                    pending.insert(id, reply);
                }
                Some(Command::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        break format!("ping failed: {}", e);
                    }
                }
                // Dropping both halves severs the TCP connection without a close handshake.
                Some(Command::Terminate) => break "terminated: no pong received".to_string(),
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break "closed by owner".to_string();
                }
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => dispatch(&text, &mut pending),
                Some(Ok(Message::Pong(_))) => {
                    let _ = events.send(SocketEvent::Pong);
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("{}: {}", u16::from(f.code), f.reason),
                        None => "closed by peer".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("websocket error: {}", e),
                None => break "stream ended".to_string(),
            },
        }
    };

    drop(sink);
    drop(source);
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::Closed));
    }
    tracing::debug!(reason = %reason, "websocket io loop finished");
    let _ = events.send(SocketEvent::Close(reason));
}

fn dispatch(text: &str, pending: &mut HashMap<u64, Reply>) {
    let v: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(%e, "ignoring non-JSON websocket frame");
            return;
        }
    };
    let Some(id) = v.get("id").and_then(|i| i.as_u64()) else {
        return;
    };
    if let Some(reply) = pending.remove(&id) {
        let _ = reply.send(rpc_result(v));
    }
}
