//! Shared primitives for the Beach chat fan-out service.
//!
//! Both the server and the client speak in terms of [`ChatMessage`]; the
//! request/response bodies for the send endpoint and the stream completion
//! status carried in WebSocket close frames live here so the two sides never
//! drift apart.

mod message;
mod status;

pub use message::{ChatMessage, ReadRequest, SendRequest, SendResponse, SEND_ACCEPTED, SYSTEM_SENDER};
pub use status::{StreamStatus, CLOSE_CANCELLED, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
