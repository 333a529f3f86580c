use std::{borrow::Cow, sync::Arc};

use beach_chat_core::{ChatMessage, SendRequest, SendResponse, StreamStatus};
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::receive::{ReceiveCoordinator, ReceiveStatus};

type ChatStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the chat server.
    pub server: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "localhost:9090".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to open receive stream: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server acknowledgement for a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub result: String,
}

/// Chat participant: sends over plain request/response calls and receives
/// over a separate WebSocket stream.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    user_name: String,
    send_url: Url,
    chat_url: Url,
}

impl ChatClient {
    pub fn new(user_name: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        let user_name = user_name.into();
        let send_url = endpoint(&format!("http://{}/send", config.server))?;
        let mut chat_url = endpoint(&format!("ws://{}/chat", config.server))?;
        chat_url.query_pairs_mut().append_pair("name", &user_name);
        Ok(Self {
            http: Client::new(),
            user_name,
            send_url,
            chat_url,
        })
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Sends one message and waits for the server's acknowledgement. Failures
    /// are returned as-is; nothing is retried.
    pub async fn send(&self, body: impl Into<String>) -> Result<SendAck, ClientError> {
        let request = SendRequest {
            name: self.user_name.clone(),
            message: body.into(),
        };
        let res = self
            .http
            .post(self.send_url.clone())
            .json(&request)
            .send()
            .await?;

        if res.status().is_success() {
            let response: SendResponse = res.json().await?;
            Ok(SendAck {
                result: response.result,
            })
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ClientError::UnexpectedStatus { status, body })
        }
    }

    /// Opens the receive stream and starts pumping it in the background.
    pub async fn read_chat(&self) -> Result<ReceiveSession, ClientError> {
        self.read_chat_with(|_| {}).await
    }

    /// Like [`read_chat`](Self::read_chat), calling `observer` for every
    /// inbound message before it becomes the session's last message.
    pub async fn read_chat_with<F>(&self, observer: F) -> Result<ReceiveSession, ClientError>
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let (stream, _) = connect_async(self.chat_url.as_str()).await?;
        debug!(user = %self.user_name, "receive stream opened");

        let coordinator = Arc::new(ReceiveCoordinator::new());
        let pump = tokio::spawn(pump(stream, coordinator.clone(), observer));
        Ok(ReceiveSession { coordinator, pump })
    }
}

fn endpoint(raw: &str) -> Result<Url, ClientError> {
    Url::parse(raw).map_err(|source| ClientError::InvalidEndpoint {
        endpoint: raw.to_string(),
        source,
    })
}

/// A running receive stream.
pub struct ReceiveSession {
    coordinator: Arc<ReceiveCoordinator>,
    pump: JoinHandle<()>,
}

impl ReceiveSession {
    /// Waits for the stream to end, either from the server side or through
    /// [`request_end`](Self::request_end).
    pub async fn wait(&self) -> ReceiveStatus {
        self.coordinator.wait().await
    }

    /// Blocking flavour of [`wait`](Self::wait) for plain application threads.
    pub fn wait_blocking(&self) -> ReceiveStatus {
        self.coordinator.wait_blocking()
    }

    pub fn request_end(&self) -> bool {
        self.coordinator.request_end()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.coordinator.last_message()
    }

    /// Cloneable trigger for ending the session from another thread.
    pub fn end_handle(&self) -> EndHandle {
        EndHandle {
            coordinator: self.coordinator.clone(),
        }
    }

    /// Waits for the background pump to wind down after the session resolved.
    pub async fn join(self) {
        if let Err(err) = self.pump.await {
            warn!(error = %err, "receive pump failed");
        }
    }
}

#[derive(Clone)]
pub struct EndHandle {
    coordinator: Arc<ReceiveCoordinator>,
}

impl EndHandle {
    pub fn request_end(&self) -> bool {
        self.coordinator.request_end()
    }
}

async fn pump<F>(mut stream: ChatStream, coordinator: Arc<ReceiveCoordinator>, observer: F)
where
    F: Fn(&ChatMessage) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = coordinator.wait() => {
                // Resolved without a close from the server: hang up ourselves.
                debug!(by_request = coordinator.end_requested(), "closing receive stream");
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Cow::Borrowed("ended by request"),
                };
                if let Err(err) = stream.close(Some(frame)).await {
                    debug!(error = %err, "close handshake failed");
                }
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ChatMessage>(&text) {
                    Ok(message) => {
                        observer(&message);
                        coordinator.on_read(message);
                    }
                    Err(err) => warn!(error = %err, "discarding malformed chat message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let status = frame
                        .map(|f| StreamStatus::from_close(u16::from(f.code), &f.reason))
                        .unwrap_or_else(|| StreamStatus::Unknown("closed without status".to_string()));
                    if !status.is_ok() {
                        warn!(status = %status, "server ended the receive stream abnormally");
                    }
                    coordinator.on_done(status.into());
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    coordinator.on_done(ReceiveStatus::Failed(err.to_string()));
                    break;
                }
                None => {
                    coordinator.on_done(ReceiveStatus::Failed("stream ended without status".to_string()));
                    break;
                }
            },
        }
    }
    debug!(outcome = ?coordinator.outcome(), "receive pump finished");
}
