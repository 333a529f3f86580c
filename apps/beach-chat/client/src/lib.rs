//! Client side of the Beach chat fan-out service.
//!
//! [`ChatClient::send`] is a plain request/response call. [`ChatClient::read_chat`]
//! opens the receive stream and returns a [`ReceiveSession`] that the
//! application can wait on, or end early from any thread.

mod client;
pub mod receive;

pub use beach_chat_core::ChatMessage;
pub use client::{ChatClient, ClientConfig, ClientError, EndHandle, ReceiveSession, SendAck};
pub use receive::{ReceiveCoordinator, ReceiveStatus};
