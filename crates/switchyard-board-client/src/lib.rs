//! Switchboard client (spec.md §4.K).
//!
//! The in-agent half of the switchboard protocol: registers over HTTP on
//! startup, keeps a WebSocket open against `?agent=<name>`, and reconnects
//! with exponential backoff (capped at 30s) on disconnect. The reconnect
//! loop is grounded on `tandem-channels::dispatcher::supervise` (backoff
//! doubling capped, `tokio::spawn` per connection attempt), and the raw
//! WebSocket read/write split is grounded on `tandem-channels::discord`'s
//! gateway client (`tokio_tungstenite::connect_async`, `StreamExt::split`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use switchyard_types::{InboxMessage, MessageKind, MessagePriority, OrchestratorConfig};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Bound on the outbound queue used while disconnected; oldest entries are
/// dropped on overflow rather than blocking the caller (spec.md §4.K).
const OUTBOUND_QUEUE_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct OutboundEmit {
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub priority: MessagePriority,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<Value>,
}

impl OutboundEmit {
    fn to_frame(&self) -> Value {
        json!({
            "type": "emit",
            "to": self.to,
            "kind": self.kind,
            "priority": self.priority,
            "subject": self.subject,
            "body": self.body,
            "metadata": self.metadata,
        })
    }

    fn to_http_body(&self) -> Value {
        json!({
            "from": self.from,
            "to": self.to,
            "kind": self.kind,
            "priority": self.priority,
            "subject": self.subject,
            "body": self.body,
            "metadata": self.metadata,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    SentOverWebSocket,
    SentOverHttp,
    Queued,
}

/// Shared handle given to the owning agent: register, send, and a channel
/// of incoming inbox messages to drive the agent's own handler.
pub struct SwitchboardClient {
    agent_name: String,
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    ws_tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    pending: Mutex<VecDeque<OutboundEmit>>,
    connected: AtomicBool,
    inbound_tx: mpsc::Sender<InboxMessage>,
}

impl SwitchboardClient {
    /// Registers with the daemon over HTTP, then spawns the reconnect loop
    /// in the background. Returns the client handle plus the receiving end
    /// of the inbound-message channel the caller should poll.
    pub async fn connect(
        config: &OrchestratorConfig,
        agent_name: impl Into<String>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<InboxMessage>)> {
        let agent_name = agent_name.into();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let client = Arc::new(Self {
            agent_name: agent_name.clone(),
            http: reqwest::Client::new(),
            base_url: config.switchboard_url.clone(),
            ws_url: config.switchboard_ws.clone(),
            ws_tx: Mutex::new(None),
            pending: Mutex::new(VecDeque::with_capacity(OUTBOUND_QUEUE_CAP)),
            connected: AtomicBool::new(false),
            inbound_tx,
        });

        client.register().await;

        let supervised = client.clone();
        tokio::spawn(async move { supervised.supervise().await });

        Ok((client, inbound_rx))
    }

    async fn register(&self) {
        let url = format!("{}/register", self.base_url.trim_end_matches('/'));
        let body = json!({ "name": self.agent_name });
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            warn!(error = %e, agent = %self.agent_name, "switchboard client: register failed, will retry on connect");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Reconnect loop: connect, reset backoff, stream frames until the
    /// socket closes, then sleep with exponential backoff (capped at 30s)
    /// before trying again. Mirrors `tandem-channels::dispatcher::supervise`.
    async fn supervise(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.run_connection().await {
                Ok(()) => {
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(error = %e, agent = %self.agent_name, "switchboard client: connection error");
                }
            }
            self.connected.store(false, Ordering::Relaxed);
            *self.ws_tx.lock().await = None;
            warn!(
                agent = %self.agent_name,
                backoff_secs = backoff.as_secs(),
                "switchboard client: reconnecting"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn run_connection(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}?agent={}",
            self.ws_url,
            urlencode(&self.agent_name)
        );
        let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.ws_tx.lock().await = Some(tx);
        self.connected.store(true, Ordering::Relaxed);
        info!(agent = %self.agent_name, "switchboard client: connected");
        self.flush_pending().await;

        let writer = async {
            while let Some(frame) = rx.recv().await {
                if write.send(frame).await.is_err() {
                    break;
                }
            }
        };

        let reader = async {
            while let Some(frame) = read.next().await {
                let frame = frame?;
                let WsMessage::Text(text) = frame else { continue };
                self.handle_frame(&text).await;
            }
            Ok::<(), anyhow::Error>(())
        };

        tokio::select! {
            _ = writer => Ok(()),
            result = reader => result,
        }
    }

    async fn handle_frame(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return;
        };
        match value.get("type").and_then(|v| v.as_str()) {
            Some("connected") => {
                info!(agent = %self.agent_name, pending = %value["pendingMessages"], "switchboard client: session established");
            }
            Some("message") => {
                if let Some(data) = value.get("data") {
                    if let Ok(message) = serde_json::from_value::<InboxMessage>(data.clone()) {
                        let _ = self.inbound_tx.send(message).await;
                    }
                }
            }
            Some("ack") => {
                info!(agent = %self.agent_name, id = ?value.get("id"), "switchboard client: delivery acknowledged");
            }
            Some("pong") => {}
            Some("ping") => {
                self.send_raw(json!({ "type": "pong", "timestamp": now_rfc3339() })).await;
            }
            _ => {}
        }
    }

    async fn send_raw(&self, frame: Value) -> bool {
        let tx = self.ws_tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx.send(WsMessage::Text(frame.to_string())).is_ok(),
            None => false,
        }
    }

    async fn flush_pending(&self) {
        let mut pending = self.pending.lock().await;
        while let Some(emit) = pending.pop_front() {
            if !self.send_raw(emit.to_frame()).await {
                pending.push_front(emit);
                break;
            }
        }
    }

    /// Sends a message to another agent. Prefers the open WebSocket
    /// (`emit` frame); falls back to `POST /emit` if the socket isn't open
    /// or the send fails, and finally queues the emit (bounded,
    /// drop-oldest) to retry once reconnected (spec.md §4.K).
    pub async fn send(
        &self,
        to: impl Into<String>,
        body: impl Into<String>,
        kind: MessageKind,
        priority: MessagePriority,
        subject: Option<String>,
        metadata: Option<Value>,
    ) -> SendOutcome {
        let emit = OutboundEmit {
            from: self.agent_name.clone(),
            to: to.into(),
            kind,
            priority,
            subject,
            body: body.into(),
            metadata,
        };

        if self.send_raw(emit.to_frame()).await {
            return SendOutcome::SentOverWebSocket;
        }

        let url = format!("{}/emit", self.base_url.trim_end_matches('/'));
        match self.http.post(&url).json(&emit.to_http_body()).send().await {
            Ok(resp) if resp.status().is_success() => SendOutcome::SentOverHttp,
            _ => {
                self.enqueue(emit).await;
                SendOutcome::Queued
            }
        }
    }

    async fn enqueue(&self, emit: OutboundEmit) {
        let mut pending = self.pending.lock().await;
        if pending.len() >= OUTBOUND_QUEUE_CAP {
            pending.pop_front();
        }
        pending.push_back(emit);
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
