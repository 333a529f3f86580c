use std::{fmt, sync::Arc};

use beach_chat_core::{ChatMessage, StreamStatus};
use thiserror::Error;

/// Stable identity of a subscriber session. Ids are handed out in increasing
/// order, so sorting by id yields registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery stream closed")]
    Closed,
    #[error("delivery transport error: {0}")]
    Transport(String),
}

/// Outbound half of one subscriber's stream.
///
/// `start_write` must not be called again until the transport has reported
/// the previous write through [`crate::ChatService::on_write_done`]. An `Err`
/// means the write never started and counts as a failed acknowledgement.
pub trait DeliveryHandle: Send + Sync {
    fn start_write(&self, message: ChatMessage) -> Result<(), DeliveryError>;
    fn finish(&self, status: StreamStatus);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Terminal reason recorded, one write still waiting for its ack.
    Finishing,
    /// Terminal and drained; removed on the next dispatch pass.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The transport reported the call as done.
    Completed,
    /// The peer went away or the call was cancelled.
    Cancelled,
    /// The server ended the stream on purpose.
    EndRequested,
    /// A write to the subscriber failed.
    DeliveryFailed,
}

impl FinishReason {
    /// Status the transport should finish the stream with, if it still needs
    /// finishing at all.
    pub fn stream_status(self) -> Option<StreamStatus> {
        match self {
            FinishReason::Completed => None,
            FinishReason::Cancelled => Some(StreamStatus::Cancelled),
            FinishReason::EndRequested => Some(StreamStatus::Ok),
            FinishReason::DeliveryFailed => {
                Some(StreamStatus::Unknown("Unexpected Failure".to_string()))
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FinishReason::Completed => "completed",
            FinishReason::Cancelled => "cancelled",
            FinishReason::EndRequested => "end_requested",
            FinishReason::DeliveryFailed => "delivery_failed",
        }
    }
}

/// Delivery progress and lifecycle of one subscriber.
pub struct Session {
    id: SessionId,
    subscriber: String,
    cursor: usize,
    lifecycle: Lifecycle,
    outstanding: bool,
    finish_reason: Option<FinishReason>,
    handle: Arc<dyn DeliveryHandle>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        subscriber: String,
        cursor: usize,
        handle: Arc<dyn DeliveryHandle>,
    ) -> Self {
        Self {
            id,
            subscriber,
            cursor,
            lifecycle: Lifecycle::Active,
            outstanding: false,
            finish_reason: None,
            handle,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn has_outstanding_delivery(&self) -> bool {
        self.outstanding
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub(crate) fn handle(&self) -> &Arc<dyn DeliveryHandle> {
        &self.handle
    }

    /// Claims the next write if the session is idle and behind `log_len`.
    /// Returns the log position to deliver.
    pub(crate) fn begin_delivery(&mut self, log_len: usize) -> Option<usize> {
        if self.lifecycle != Lifecycle::Active || self.outstanding || self.cursor >= log_len {
            return None;
        }
        self.outstanding = true;
        Some(self.cursor)
    }

    /// Releases a claim taken by [`Session::begin_delivery`] without sending.
    pub(crate) fn abandon_delivery(&mut self) {
        self.outstanding = false;
    }

    /// Applies the transport's acknowledgement for the outstanding write.
    /// Returns `true` when a failure moved the session out of `Active`.
    pub(crate) fn complete_delivery(&mut self, ok: bool) -> bool {
        if !self.outstanding {
            return false;
        }
        self.outstanding = false;
        if ok {
            self.cursor += 1;
        }
        match self.lifecycle {
            Lifecycle::Finishing => {
                self.lifecycle = Lifecycle::Finished;
                false
            }
            Lifecycle::Active if !ok => self.mark_finished(FinishReason::DeliveryFailed),
            _ => false,
        }
    }

    /// Moves the session towards `Finished`. Only the first call has an
    /// effect; it returns `true`.
    pub(crate) fn mark_finished(&mut self, reason: FinishReason) -> bool {
        if self.lifecycle != Lifecycle::Active {
            return false;
        }
        self.finish_reason = Some(reason);
        self.lifecycle = if self.outstanding {
            Lifecycle::Finishing
        } else {
            Lifecycle::Finished
        };
        true
    }

    pub(crate) fn is_removable(&self) -> bool {
        self.lifecycle == Lifecycle::Finished && !self.outstanding
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("cursor", &self.cursor)
            .field("lifecycle", &self.lifecycle)
            .field("outstanding", &self.outstanding)
            .field("finish_reason", &self.finish_reason)
            .finish()
    }
}
