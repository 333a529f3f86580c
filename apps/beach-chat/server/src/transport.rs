//! axum front end: `POST /send` for ingress and `GET /chat` for the
//! WebSocket receive stream, plus the usual health, stats and metrics routes.

use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beach_chat_core::{ChatMessage, ReadRequest, SendRequest, SendResponse, StreamStatus};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    session::{DeliveryError, DeliveryHandle, Lifecycle, SessionId},
    ChatService,
};

struct AppState {
    service: ChatService,
    metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    log_len: usize,
    active_sessions: usize,
    sessions: Vec<SessionStatsEntry>,
}

#[derive(Debug, Serialize)]
struct SessionStatsEntry {
    session_id: String,
    subscriber: String,
    cursor: usize,
    lifecycle: &'static str,
    outstanding: bool,
}

pub fn build_router(service: ChatService, metrics: Option<PrometheusHandle>) -> Router {
    let state = Arc::new(AppState { service, metrics });
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/send", post(send_handler))
        .route("/chat", get(chat_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions: Vec<SessionStatsEntry> = state
        .service
        .sessions()
        .into_iter()
        .map(|snapshot| SessionStatsEntry {
            session_id: snapshot.session_id.to_string(),
            subscriber: snapshot.subscriber,
            cursor: snapshot.cursor,
            lifecycle: lifecycle_label(snapshot.lifecycle),
            outstanding: snapshot.outstanding,
        })
        .collect();
    Json(StatsResponse {
        log_len: state.service.log_len(),
        active_sessions: sessions.len(),
        sessions,
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Json<SendResponse> {
    let ack = state.service.publish(ChatMessage::from(request));
    debug!(position = ack.position, "message accepted");
    Json(SendResponse::accepted())
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<ReadRequest>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let service = state.service.clone();
    ws.on_upgrade(move |socket| serve_subscriber(socket, service, request.name))
}

fn lifecycle_label(lifecycle: Lifecycle) -> &'static str {
    match lifecycle {
        Lifecycle::Active => "active",
        Lifecycle::Finishing => "finishing",
        Lifecycle::Finished => "finished",
    }
}

enum Outbound {
    Deliver(ChatMessage),
    Finish(StreamStatus),
}

/// Delivery handle for one WebSocket; writes are queued to the connection's
/// writer task, which reports each one back through
/// [`ChatService::on_write_done`].
struct WsDelivery {
    tx: mpsc::UnboundedSender<Outbound>,
    finished: AtomicBool,
}

impl WsDelivery {
    fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            tx,
            finished: AtomicBool::new(false),
        }
    }
}

impl DeliveryHandle for WsDelivery {
    fn start_write(&self, message: ChatMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(Outbound::Deliver(message))
            .map_err(|_| DeliveryError::Closed)
    }

    fn finish(&self, status: StreamStatus) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Outbound::Finish(status));
    }
}

async fn serve_subscriber(socket: WebSocket, service: ChatService, subscriber: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Arc::new(WsDelivery::new(tx));
    let session_id = service.open_session(subscriber.clone(), handle);

    let mut writer = tokio::spawn(write_loop(service.clone(), session_id, sink, rx));
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(frame))) => {
                    info!(
                        session_id = %session_id,
                        subscriber = %subscriber,
                        reason = ?frame.map(|f| f.reason.to_string()),
                        "subscriber closed stream"
                    );
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(
                        session_id = %session_id,
                        error = %err,
                        "error receiving from subscriber"
                    );
                    break;
                }
                None => break,
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    service.cancel_session(session_id);
    if !writer_done {
        if let Err(err) = writer.await {
            warn!(session_id = %session_id, error = %err, "writer task failed");
        }
    }
    service.complete_session(session_id);
    info!(session_id = %session_id, subscriber = %subscriber, "subscriber stream closed");
}

async fn write_loop(
    service: ChatService,
    session_id: SessionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Deliver(message) => {
                let ok = match serde_json::to_string(&message) {
                    Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "failed to encode message");
                        false
                    }
                };
                service.on_write_done(session_id, ok);
            }
            Outbound::Finish(status) => {
                let frame = CloseFrame {
                    code: status.close_code(),
                    reason: Cow::Owned(status.reason().to_string()),
                };
                if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                    debug!(session_id = %session_id, error = %err, "close frame not delivered");
                }
                break;
            }
        }
    }

    // Anything still queued never reached the socket.
    rx.close();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Deliver(_) = outbound {
            service.on_write_done(session_id, false);
        }
    }
    debug!(session_id = %session_id, "writer task finished");
}
