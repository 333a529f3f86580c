use serde::{Deserialize, Serialize};

/// Sender name used for notices the server appends on its own.
pub const SYSTEM_SENDER: &str = "System";

/// Result text returned by the send endpoint once a message is in the log.
pub const SEND_ACCEPTED: &str = "OK";

/// A single chat line. On the wire the fields are `name` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "name")]
    pub sender: String,
    #[serde(rename = "message")]
    pub body: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// Notice appended when `subscriber` opens a receive stream.
    pub fn joined(subscriber: &str) -> Self {
        Self::new(SYSTEM_SENDER, format!("{subscriber} has joined the chat!"))
    }

    /// Notice appended once a subscriber's stream has been torn down.
    pub fn left(subscriber: &str) -> Self {
        Self::new(SYSTEM_SENDER, format!("{subscriber} has left the chat!"))
    }
}

/// Body of `POST /send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub name: String,
    pub message: String,
}

impl From<SendRequest> for ChatMessage {
    fn from(request: SendRequest) -> Self {
        ChatMessage::new(request.name, request.message)
    }
}

/// Acknowledgement returned by `POST /send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub result: String,
}

impl SendResponse {
    pub fn accepted() -> Self {
        Self {
            result: SEND_ACCEPTED.to_string(),
        }
    }
}

/// Query string of `GET /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub name: String,
}
