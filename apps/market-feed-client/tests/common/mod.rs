//! Scripted in-memory feed shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use url::Url;

use market_feed_client::application::ports::{
    HealthProbe, ProbeError, SharedClock, TransportError, TransportFrame,
};
use market_feed_client::{
    ClientEvent, ConnectionManager, ConnectionManagerBuilder, ManualClock, ReconnectConfig,
    StaticCredentials, Transport, TransportConnection,
};

pub const FEED_URL: &str = "wss://feed.example.com/ws";
pub const TOKEN: &str = "test-token";
pub const USER: &str = "user-1";

/// What the next `open` does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Open succeeds; a [`ServerHandle`] is handed to the test.
    Accept,
    /// Open fails immediately.
    Refuse,
    /// Open never completes.
    Hang,
}

/// Something the client wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Text(Value),
    Close { code: u16, reason: String },
}

type Inbound = Result<TransportFrame, TransportError>;

/// Transport that follows a script. Opens beyond the script are refused.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    opens: AtomicUsize,
    urls: Mutex<Vec<Url>>,
    servers: mpsc::UnboundedSender<ServerHandle>,
}

impl ScriptedTransport {
    pub fn new(steps: &[Step]) -> (Arc<Self>, Servers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(steps.iter().copied().collect()),
            opens: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            servers: tx,
        });
        (transport, Servers { rx })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);

        match step {
            Step::Refuse => Err(TransportError::Connect("connection refused".into())),
            Step::Hang => std::future::pending().await,
            Step::Accept => {
                let (to_server, from_client) = mpsc::unbounded_channel();
                let (to_client, from_server) = mpsc::unbounded_channel();
                let _ = self.servers.send(ServerHandle {
                    from_client,
                    to_client,
                });
                Ok(Box::new(ScriptedConnection {
                    to_server,
                    from_server,
                }))
            }
        }
    }
}

struct ScriptedConnection {
    to_server: mpsc::UnboundedSender<ClientFrame>,
    from_server: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl TransportConnection for ScriptedConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let value = serde_json::from_str(&text).expect("client sent invalid JSON");
        self.to_server
            .send(ClientFrame::Text(value))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Inbound> {
        self.from_server.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.to_server
            .send(ClientFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

/// Health probe that fails a fixed number of times, then passes.
pub struct ScriptedProbe {
    failures: AtomicUsize,
    checks: AtomicUsize,
}

impl ScriptedProbe {
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(times),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(ProbeError::Status(503))
        } else {
            Ok(())
        }
    }
}

/// Accepted connections, in order.
pub struct Servers {
    rx: mpsc::UnboundedReceiver<ServerHandle>,
}

impl Servers {
    pub async fn next(&mut self) -> ServerHandle {
        tokio::time::timeout(Duration::from_secs(600), self.rx.recv())
            .await
            .expect("no connection accepted")
            .expect("transport dropped")
    }
}

/// Server side of one accepted connection. Dropping it ends the stream.
pub struct ServerHandle {
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
    to_client: mpsc::UnboundedSender<Inbound>,
}

impl ServerHandle {
    pub fn push(&self, value: Value) {
        let _ = self
            .to_client
            .send(Ok(TransportFrame::Text(value.to_string())));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(TransportFrame::Text(text.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Ok(TransportFrame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .send(Err(TransportError::Receive(message.to_string())));
    }

    pub fn confirm(&self, symbols: &[&str]) {
        self.push(json!({"type": "subscription_confirmed", "symbols": symbols}));
    }

    pub fn quote(&self, symbol: &str, price: f64) {
        self.push(json!({
            "type": "market_data_update",
            "symbol": symbol,
            "data": {"price": price},
            "timestamp": 1_700_000_000_000_i64,
        }));
    }

    /// Next frame the client wrote.
    pub async fn next_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(600), self.from_client.recv())
            .await
            .expect("client wrote nothing")
            .expect("client connection dropped")
    }

    /// Next frame that is not a ping.
    pub async fn next_message(&mut self) -> ClientFrame {
        loop {
            let frame = self.next_frame().await;
            if !is_ping(&frame) {
                return frame;
            }
        }
    }

    /// Everything written so far, without waiting.
    pub fn drain(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub fn is_ping(frame: &ClientFrame) -> bool {
    matches!(frame, ClientFrame::Text(v) if v["action"] == "ping")
}

pub fn subscribe_frame(symbols: &[&str], channels: &[&str]) -> ClientFrame {
    ClientFrame::Text(json!({"action": "subscribe", "symbols": symbols, "channels": channels}))
}

pub fn unsubscribe_frame(symbols: &[&str]) -> ClientFrame {
    ClientFrame::Text(json!({"action": "unsubscribe", "symbols": symbols}))
}

pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
    ))
}

pub fn builder(
    transport: &Arc<ScriptedTransport>,
    clock: &Arc<ManualClock>,
) -> ConnectionManagerBuilder {
    ConnectionManager::builder(Url::parse(FEED_URL).unwrap())
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .credentials(Arc::new(StaticCredentials::new(TOKEN)))
        .clock(Arc::clone(clock) as SharedClock)
        .reconnect(ReconnectConfig::default())
}

/// Wait for the first event matching `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event never arrived")
}

/// Let spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
