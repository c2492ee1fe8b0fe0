//! Switchboard daemon (spec.md §4.J).
//!
//! One listening port serves both pull-style HTTP (JSON bodies) and
//! push-style WebSocket upgrades keyed by `?agent=<name>`. Router assembly,
//! the CORS layer, and the `axum::serve(...).with_graceful_shutdown(...)`
//! shutdown wiring are lifted directly from `tandem-server::http::serve`;
//! the WebSocket upgrade handler generalises
//! `tandem-server::http::pty_ws`/`pty_ws_stream` from a single PTY byte
//! stream to a per-agent fan-out channel carrying JSON frames.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use switchyard_types::{AgentPresence, InboxMessage, MessageKind, MessagePriority};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Deserialize)]
struct RegisterInput {
    name: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmitInput {
    #[serde(default)]
    from: Option<String>,
    to: String,
    #[serde(default)]
    kind: Option<MessageKind>,
    #[serde(default)]
    priority: Option<MessagePriority>,
    #[serde(default)]
    subject: Option<String>,
    body: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    agent: String,
}

struct Connection {
    tx: mpsc::UnboundedSender<Value>,
    last_pong_at_ms: AtomicU64,
}

#[derive(Default)]
struct Inner {
    inboxes: HashMap<String, Vec<InboxMessage>>,
    presence: HashMap<String, AgentPresence>,
    next_seq: u64,
}

/// Shared daemon state. Every mutation passes through a single `Mutex`
/// (spec.md §5: "all message mutations pass through a single serialisation
/// point — no concurrent writes to inbox state").
pub struct BoardState {
    inner: Mutex<Inner>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    persist_path: PathBuf,
    started_at_ms: u64,
}

impl BoardState {
    pub async fn new(state_dir: &Path) -> anyhow::Result<Arc<Self>> {
        tokio::fs::create_dir_all(state_dir).await?;
        let persist_path = state_dir.join("messages.json");
        let inner = load_snapshot(&persist_path).await;
        Ok(Arc::new(Self {
            inner: Mutex::new(inner),
            connections: Mutex::new(HashMap::new()),
            persist_path,
            started_at_ms: now_ms(),
        }))
    }

    async fn persist(&self, inner: &Inner) -> anyhow::Result<()> {
        let snapshot = Snapshot {
            inboxes: inner.inboxes.clone(),
            next_seq: inner.next_seq,
        };
        let body = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self
            .persist_path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &self.persist_path).await?;
        Ok(())
    }

    async fn push_to(&self, agent: &str, frame: Value) {
        let connections = self.connections.lock().await;
        if let Some(conn) = connections.get(agent) {
            let _ = conn.tx.send(frame);
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct Snapshot {
    inboxes: HashMap<String, Vec<InboxMessage>>,
    next_seq: u64,
}

async fn load_snapshot(path: &Path) -> Inner {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => Inner {
                inboxes: snapshot.inboxes,
                presence: HashMap::new(),
                next_seq: snapshot.next_seq,
            },
            Err(e) => {
                warn!(error = %e, "switchboard: messages.json unparseable, starting fresh");
                Inner::default()
            }
        },
        Err(_) => Inner::default(),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn app_router(state: Arc<BoardState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/agents", get(agents))
        .route("/emit", post(emit))
        .route("/inbox/:agent", get(inbox).delete(purge_inbox))
        .route("/inbox/:agent/:id", delete(ack))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<BoardState>>) -> Json<Value> {
    let inner = state.inner.lock().await;
    let connections = state.connections.lock().await;
    let undelivered: usize = inner.inboxes.values().map(|v| v.len()).sum();
    Json(json!({
        "status": "ok",
        "uptimeMs": now_ms().saturating_sub(state.started_at_ms),
        "inboxes": inner.inboxes.len(),
        "agents": inner.presence.len(),
        "openWebsockets": connections.len(),
        "undeliveredMessages": undelivered,
    }))
}

async fn register(State(state): State<Arc<BoardState>>, Json(input): Json<RegisterInput>) -> Json<Value> {
    let mut inner = state.inner.lock().await;
    upsert_presence(&mut inner, &input.name);
    inner.inboxes.entry(input.name.clone()).or_default();
    let _ = input.cwd;
    Json(json!({ "ok": true, "name": input.name }))
}

fn upsert_presence(inner: &mut Inner, name: &str) {
    let now = now_ms();
    inner
        .presence
        .entry(name.to_string())
        .and_modify(|p| p.last_seen_at_ms = now)
        .or_insert(AgentPresence {
            name: name.to_string(),
            registered_at_ms: now,
            last_seen_at_ms: now,
            connected: false,
        });
}

async fn agents(State(state): State<Arc<BoardState>>) -> Json<Value> {
    let inner = state.inner.lock().await;
    let list: Vec<Value> = inner
        .presence
        .values()
        .map(|p| {
            json!({
                "name": p.name,
                "registeredAtMs": p.registered_at_ms,
                "lastSeenAtMs": p.last_seen_at_ms,
                "connected": p.connected,
                "inboxSize": inner.inboxes.get(&p.name).map(|v| v.len()).unwrap_or(0),
            })
        })
        .collect();
    Json(json!(list))
}

async fn emit(State(state): State<Arc<BoardState>>, Json(input): Json<EmitInput>) -> Json<Value> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let message = {
        let mut inner = state.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        upsert_presence(&mut inner, &input.to);
        let message = InboxMessage {
            id: id.clone(),
            from: input.from.clone().unwrap_or_else(|| "unknown".to_string()),
            to: input.to.clone(),
            kind: input.kind.unwrap_or(MessageKind::Info),
            priority: input.priority.unwrap_or_default(),
            subject: input.subject.clone(),
            body: input.body.clone(),
            timestamp: now_rfc3339(),
            metadata: input.metadata.clone().unwrap_or_else(|| json!({})),
            seq,
        };
        inner.inboxes.entry(input.to.clone()).or_default().push(message.clone());
        let _ = state.persist(&inner).await;
        message
    };

    state
        .push_to(&input.to, json!({ "type": "message", "data": message }))
        .await;

    Json(json!({ "id": id }))
}

async fn inbox(
    State(state): State<Arc<BoardState>>,
    AxumPath(agent): AxumPath<String>,
    Query(query): Query<InboxQuery>,
) -> Json<Value> {
    let mut inner = state.inner.lock().await;
    upsert_presence(&mut inner, &agent);
    let mut messages = inner.inboxes.get(&agent).cloned().unwrap_or_default();
    messages.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
    if let Some(limit) = query.limit {
        messages.truncate(limit);
    }
    Json(json!(messages))
}

async fn ack(
    State(state): State<Arc<BoardState>>,
    AxumPath((agent, id)): AxumPath<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let acked = {
        let mut inner = state.inner.lock().await;
        let Some(inbox) = inner.inboxes.get_mut(&agent) else {
            return Err(StatusCode::NOT_FOUND);
        };
        let position = inbox.iter().position(|m| m.id == id);
        let Some(position) = position else {
            return Err(StatusCode::NOT_FOUND);
        };
        let message = inbox.remove(position);
        let _ = state.persist(&inner).await;
        message
    };

    state
        .push_to(&acked.from, json!({ "type": "ack", "id": acked.id }))
        .await;

    Ok(Json(json!({ "ok": true })))
}

async fn purge_inbox(State(state): State<Arc<BoardState>>, AxumPath(agent): AxumPath<String>) -> Json<Value> {
    let mut inner = state.inner.lock().await;
    let removed = inner.inboxes.insert(agent, Vec::new()).map(|v| v.len()).unwrap_or(0);
    let _ = state.persist(&inner).await;
    Json(json!({ "ok": true, "removed": removed }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BoardState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.agent))
}

async fn handle_socket(socket: WebSocket, state: Arc<BoardState>, agent: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let connection = Arc::new(Connection {
        tx: tx.clone(),
        last_pong_at_ms: AtomicU64::new(now_ms()),
    });

    let pending = {
        let mut inner = state.inner.lock().await;
        upsert_presence(&mut inner, &agent);
        if let Some(p) = inner.presence.get_mut(&agent) {
            p.connected = true;
        }
        state.connections.lock().await.insert(agent.clone(), connection.clone());
        let mut messages = inner.inboxes.get(&agent).cloned().unwrap_or_default();
        messages.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
        messages
    };

    let _ = tx.send(json!({
        "type": "connected",
        "agent": agent,
        "pendingMessages": pending.len(),
    }));
    for message in pending {
        let _ = tx.send(json!({ "type": "message", "data": message }));
    }

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else { continue };
        let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
        let frame_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match frame_type {
            "ping" => {
                let _ = tx.send(json!({ "type": "pong", "timestamp": now_rfc3339() }));
            }
            "pong" => {
                connection.last_pong_at_ms.store(now_ms(), Ordering::Relaxed);
            }
            "emit" => {
                let input = EmitInput {
                    from: Some(agent.clone()),
                    to: value.get("to").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    kind: value
                        .get("kind")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                    priority: value
                        .get("priority")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                    subject: value.get("subject").and_then(|v| v.as_str()).map(str::to_string),
                    body: value.get("body").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    metadata: value.get("metadata").cloned(),
                };
                let Json(result) = emit(State(state.clone()), Json(input)).await;
                let _ = tx.send(json!({ "type": "emitted", "id": result["id"] }));
            }
            "ack" => {
                if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                    let _ = ack(State(state.clone()), AxumPath((agent.clone(), id.to_string()))).await;
                }
            }
            other => {
                warn!(agent, frame_type = other, "switchboard: unrecognised ws frame type");
            }
        }
    }

    state.connections.lock().await.remove(&agent);
    let mut inner = state.inner.lock().await;
    if let Some(p) = inner.presence.get_mut(&agent) {
        p.connected = false;
    }
    drop(inner);
    forward_task.abort();
}

/// Pings every open connection and drops any that hasn't answered within
/// [`HEARTBEAT_STALE_AFTER`] (spec.md §4.J: "terminates those that fail to
/// pong").
async fn heartbeat_loop(state: Arc<BoardState>) {
    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        let mut stale = Vec::new();
        {
            let connections = state.connections.lock().await;
            for (agent, conn) in connections.iter() {
                let last = conn.last_pong_at_ms.load(Ordering::Relaxed);
                if now_ms().saturating_sub(last) > HEARTBEAT_STALE_AFTER.as_millis() as u64 {
                    stale.push(agent.clone());
                } else {
                    let _ = conn.tx.send(json!({ "type": "ping" }));
                }
            }
        }
        if !stale.is_empty() {
            let mut connections = state.connections.lock().await;
            for agent in &stale {
                warn!(agent, "switchboard: dropping connection, missed heartbeat");
                connections.remove(agent);
            }
        }
    }
}

pub async fn serve(addr: SocketAddr, state_dir: &Path) -> anyhow::Result<()> {
    let state = BoardState::new(state_dir).await?;
    let heartbeat_state = state.clone();
    let heartbeat = tokio::spawn(heartbeat_loop(heartbeat_state));

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "switchboard daemon listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;
    heartbeat.abort();
    result?;
    Ok(())
}

use futures::{SinkExt, StreamExt};
