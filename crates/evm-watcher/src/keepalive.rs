//! Connection health monitor for streaming transports.
//!
//! Some network failures never surface as a close frame, leaving a socket that
//! looks open but delivers nothing. Once the connection reports open, the monitor
//! pings every `check_interval`; if no pong arrives within `expected_pong_back`
//! the connection is terminated outright. On close (natural or forced) both
//! timers stop and the owner's disconnect callback runs exactly once.
//!
//! No retry or backoff here: what to do after a disconnect is the owner's call.

use crate::config::KeepAliveConfig;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};

/// Lifecycle events reported by the socket being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Pong,
    Close(String),
}

/// Operations the monitor performs on the socket.
pub trait SocketControl: Send + Sync + 'static {
    fn ping(&self);
    /// Sever the connection immediately, without a closing handshake.
    fn terminate(&self);
}

/// Ping/pong supervisor. Spawn one per connection.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    config: KeepAliveConfig,
}

impl KeepAlive {
    pub fn new(config: KeepAliveConfig) -> Self {
        Self { config }
    }

    /// Run the monitor until the socket closes (or its event channel is dropped).
    pub fn spawn<C, F>(
        self,
        control: C,
        events: mpsc::UnboundedReceiver<SocketEvent>,
        on_disconnect: F,
    ) -> JoinHandle<()>
    where
        C: SocketControl,
        F: FnOnce(String) + Send + 'static,
    {
        tokio::spawn(self.run(control, events, on_disconnect))
    }

    async fn run<C, F>(
        self,
        control: C,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        on_disconnect: F,
    ) where
        C: SocketControl,
        F: FnOnce(String),
    {
        let mut ticker: Option<Interval> = None;
        let mut deadline: Option<Pin<Box<Sleep>>> = None;
        let mut terminated = false;

        let reason = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SocketEvent::Open) => {
                        let period = self.config.check_interval;
                        let mut t = interval_at(Instant::now() + period, period);
                        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(t);
                    }
                    Some(SocketEvent::Pong) => {
                        tracing::trace!("websocket pong received");
                        deadline = None;
                    }
                    Some(SocketEvent::Close(reason)) => break reason,
                    None => break "socket event stream ended".to_string(),
                },
                _ = tick(&mut ticker) => {
                    tracing::trace!("websocket ping sent");
                    control.ping();
                    // Keep the oldest outstanding deadline; a later ping must not extend it.
                    if deadline.is_none() {
                        deadline = Some(Box::pin(tokio::time::sleep(self.config.expected_pong_back)));
                    }
                },
                _ = expire(&mut deadline) => {
                    deadline = None;
                    ticker = None;
                    if !terminated {
                        terminated = true;
                        tracing::warn!(
                            expected_pong_back_ms = self.config.expected_pong_back.as_millis() as u64,
                            "no pong received, terminating websocket"
                        );
                        control.terminate();
                    }
                },
            }
        };

        drop(ticker);
        drop(deadline);
        on_disconnect(reason);
    }
}

fn tick(ticker: &mut Option<Interval>) -> impl Future<Output = ()> + '_ {
    async move {
        match ticker {
            Some(t) => {
                t.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

fn expire(deadline: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match deadline {
            Some(d) => d.as_mut().await,
            None => std::future::pending().await,
        }
    }
}
