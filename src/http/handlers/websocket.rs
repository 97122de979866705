//! WebSocket endpoints and the hub's HTTP surface.
//!
//! Hub members (`/ws/connect`, `/ws/broadcast`, `/ws/chat`) write only through
//! the hub. The other endpoints own their socket for the whole session.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::unix_timestamp;
use crate::http::handlers::{param, QueryParams};
use crate::http::response::{ApiError, ApiResponse};
use crate::http::server::AppState;
use crate::stream::{self as producer, StreamSession, UnitKind};
use crate::stream::units::pattern_block;
use crate::ws::{spawn_writer, Connection, Envelope, WsError, WsSink};

/// Size of the pattern frame sent in answer to text on `/ws/binary`.
const BINARY_PATTERN_LEN: usize = 1024;

/// What a hub member does with each incoming envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubRole {
    /// Reply to the sender only.
    Connect,
    /// Re-broadcast the payload to every member.
    Broadcast,
    /// Broadcast as a chat line.
    Chat,
}

fn upgrade<F, Fut>(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    endpoint: &'static str,
    session: F,
) -> Response
where
    F: FnOnce(WebSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match ws {
        Ok(ws) => ws
            .on_failed_upgrade(move |e: axum::Error| {
                let err = WsError::UpgradeFailure(e.to_string());
                tracing::warn!(endpoint, error = %err, "WebSocket handshake failed");
            })
            .on_upgrade(session),
        Err(rejection) => {
            let err = WsError::UpgradeFailure(rejection.body_text());
            tracing::warn!(endpoint, error = %err, "WebSocket upgrade rejected");
            rejection.into_response()
        }
    }
}

/// `/ws/connect`
pub async fn connect(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    upgrade(ws, "connect", move |socket| {
        hub_member(state, socket, remote, HubRole::Connect)
    })
}

/// `/ws/broadcast`
pub async fn broadcast(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    upgrade(ws, "broadcast", move |socket| {
        hub_member(state, socket, remote, HubRole::Broadcast)
    })
}

/// `/ws/chat`
pub async fn chat(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    upgrade(ws, "chat", move |socket| {
        hub_member(state, socket, remote, HubRole::Chat)
    })
}

async fn hub_member(state: AppState, socket: WebSocket, remote: SocketAddr, role: HubRole) {
    let guard = state.sockets.track();
    let id = guard.id();
    let (sender, mut receiver) = socket.split();
    let (connection, outbound) = Connection::channel(id, state.config.websocket.outbound_queue);
    let writer = spawn_writer(id, sender, outbound);

    match state.hub.register(connection.with_remote(remote)).await {
        Ok(true) => tracing::info!(connection_id = %id, %remote, ?role, "WebSocket client joined"),
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Hub unavailable");
            writer.abort();
            return;
        }
    }

    let mut shutdown = state.shutdown.clone();
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = receiver.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Socket read failed");
                break;
            }
        };

        let incoming = Envelope::from_client_text(text.as_str());
        let delivered = match role {
            HubRole::Connect => {
                let reply = Envelope::new(
                    "response",
                    json!({ "message": "message received", "received": incoming }),
                );
                state.hub.send_to(id, &reply).await.map(|_| ())
            }
            HubRole::Broadcast => state
                .hub
                .broadcast(&Envelope::new("broadcast", incoming.data))
                .await
                .map(|_| ()),
            HubRole::Chat => {
                let user = incoming
                    .data
                    .get("user")
                    .cloned()
                    .unwrap_or_else(|| Value::String(id.to_string()));
                let content = incoming
                    .data
                    .get("content")
                    .cloned()
                    .unwrap_or_else(|| incoming.data.clone());
                let line = Envelope::new(
                    "chat",
                    json!({ "user": user, "content": content, "room": "general" }),
                );
                state.hub.broadcast(&line).await.map(|_| ())
            }
        };
        if delivered.is_err() {
            break;
        }
    }

    let _ = state.hub.unregister(id).await;
    let _ = writer.await;
    tracing::info!(connection_id = %id, "WebSocket client left");
}

/// `/ws/echo`: every data frame comes straight back.
pub async fn echo(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>, State(state): State<AppState>) -> Response {
    upgrade(ws, "echo", move |mut socket| async move {
        let _guard = state.sockets.track();
        while let Some(Ok(message)) = socket.recv().await {
            let reply = match message {
                Message::Text(_) | Message::Binary(_) => message,
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}

/// `/ws/binary`: binary frames are echoed; text is answered with a pattern block.
pub async fn binary(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>, State(state): State<AppState>) -> Response {
    upgrade(ws, "binary", move |mut socket| async move {
        let _guard = state.sockets.track();
        while let Some(Ok(message)) = socket.recv().await {
            let reply = match message {
                Message::Binary(data) => {
                    tracing::debug!(len = data.len(), "Binary frame received");
                    Message::Binary(data)
                }
                Message::Text(_) => Message::Binary(pattern_block(0, BINARY_PATTERN_LEN)),
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}

/// `/ws/realtime`: a `realtime` envelope every interval until the client leaves.
pub async fn realtime(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>, State(state): State<AppState>) -> Response {
    upgrade(ws, "realtime", move |socket| async move {
        let _guard = state.sockets.track();
        let period = Duration::from_millis(state.config.websocket.realtime_interval_ms.max(1));
        let (mut sender, mut receiver) = socket.split();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = state.shutdown.clone();
        let mut counter = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                _ = ticker.tick() => {
                    counter += 1;
                    let update = Envelope::new(
                        "realtime",
                        json!({
                            "counter": counter,
                            "timestamp": unix_timestamp(),
                            "random": fastrand::u32(..),
                        }),
                    );
                    if sender.send(update.to_message()).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
        tracing::debug!(sent = counter, "Realtime session ended");
    })
}

/// `/ws/heartbeat`: periodic pings, replies to messages, closes when idle.
pub async fn heartbeat(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>, State(state): State<AppState>) -> Response {
    upgrade(ws, "heartbeat", move |socket| async move {
        let _guard = state.sockets.track();
        let config = &state.config.websocket;
        let ping_every = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        let idle_timeout = Duration::from_secs(config.idle_timeout_secs.max(1));
        let (mut sender, mut receiver) = socket.split();
        let mut ticker = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        let mut shutdown = state.shutdown.clone();
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep_until(last_seen + idle_timeout) => {
                    tracing::debug!(idle_secs = idle_timeout.as_secs(), "Heartbeat peer idle");
                    break;
                }
                _ = ticker.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                frame = receiver.next() => {
                    last_seen = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(_))) => {
                            let reply = Envelope::new("heartbeat_response", json!("alive"));
                            if sender.send(reply.to_message()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    })
}

/// `/ws/performance?count&interval`: a counted envelope stream, then
/// `performance_complete`.
pub async fn performance(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Response {
    let config = &state.config.websocket;
    let count = param(&params, "count", &config.performance_count);
    let interval = param(&params, "interval", &config.performance_interval_ms);
    let session = StreamSession::counted(
        UnitKind::Envelope {
            kind: "performance".into(),
        },
        count,
        Duration::from_millis(interval),
    );

    upgrade(ws, "performance", move |socket| async move {
        let _guard = state.sockets.track();
        let (sender, receiver) = socket.split();
        let mut sink = WsSink::new(sender);
        let mut cancel = state.shutdown.clone();

        tokio::select! {
            result = producer::run(&session, &mut sink, &mut cancel) => match result {
                Ok(summary) => tracing::debug!(units = summary.units, outcome = ?summary.outcome, "Performance run finished"),
                Err(e) => tracing::debug!(error = %e, "Performance run aborted"),
            },
            _ = drain(receiver) => tracing::debug!("Performance client left early"),
        }
        let _ = sink.into_inner().close().await;
    })
}

/// Read until the peer closes.
async fn drain(mut receiver: SplitStream<WebSocket>) {
    while let Some(Ok(message)) = receiver.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// `POST /api/broadcast`
pub async fn broadcast_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<ApiResponse<Value>, ApiError> {
    let Json(request) = request.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let kind = if request.kind.is_empty() {
        "broadcast".to_string()
    } else {
        request.kind
    };

    let report = state
        .hub
        .broadcast(&Envelope::new(kind, Value::String(request.message.clone())))
        .await?;
    tracing::info!(recipients = report.recipients, removed = report.removed, "Broadcast via API");
    let data = json!({ "message": request.message, "report": report });
    Ok(ApiResponse::success("broadcast sent", data).with_request_id(&headers))
}

/// `GET /api/ws/clients`
pub async fn client_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<Value>, ApiError> {
    let clients = state.hub.client_count().await?;
    Ok(ApiResponse::success("connected clients", json!({ "clients": clients })).with_request_id(&headers))
}
