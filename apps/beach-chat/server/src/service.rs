use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use beach_chat_core::{ChatMessage, SEND_ACCEPTED};
use metrics::{counter, gauge};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::{
    log::MessageLog,
    registry::{DeliveryAck, SessionRegistry, SessionSnapshot},
    session::{DeliveryHandle, FinishReason, SessionId},
};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Append join/leave notices and start new subscribers after their own
    /// join notice. When off, subscribers replay the log from the beginning.
    pub announce_membership: bool,
    /// How long the dispatcher keeps draining finished sessions after
    /// shutdown before giving up on outstanding writes.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            announce_membership: true,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub position: usize,
    pub result: &'static str,
}

/// Shared chat state plus the entry points the transport calls into.
///
/// Every state change that could make a session deliverable wakes the
/// [`crate::Dispatcher`]; nothing here ever calls a delivery handle while a
/// lock is held.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    log: MessageLog,
    registry: SessionRegistry,
    wake: Notify,
    shut_down: AtomicBool,
    config: ServiceConfig,
}

impl ChatService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                log: MessageLog::new(),
                registry: SessionRegistry::new(),
                wake: Notify::new(),
                shut_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Appends a subscriber's message to the log.
    pub fn send(&self, sender: impl Into<String>, body: impl Into<String>) -> SendAck {
        self.publish(ChatMessage::new(sender, body))
    }

    /// Appends an already-built message, e.g. one decoded from a send request.
    pub fn publish(&self, message: ChatMessage) -> SendAck {
        debug!(sender = %message.sender, body = %message.body, "received message");
        let position = self.inner.log.append(message);
        counter!("beach_chat_messages_total", 1, "kind" => "user");
        self.wake();
        SendAck {
            position,
            result: SEND_ACCEPTED,
        }
    }

    /// Registers a new subscriber stream backed by `handle`.
    pub fn open_session(
        &self,
        subscriber: impl Into<String>,
        handle: Arc<dyn DeliveryHandle>,
    ) -> SessionId {
        let subscriber = subscriber.into();
        let cursor = if self.inner.config.announce_membership {
            let position = self.inner.log.append(ChatMessage::joined(&subscriber));
            counter!("beach_chat_messages_total", 1, "kind" => "join");
            position + 1
        } else {
            0
        };
        let id = self.inner.registry.register(subscriber.clone(), cursor, handle);
        gauge!("beach_chat_sessions_active", self.inner.registry.len() as f64);
        info!(session_id = %id, subscriber = %subscriber, cursor, "session registered");
        if self.is_shut_down() {
            // Registered after the shutdown sweep; end it like the rest.
            self.end_session(id);
        }
        self.wake();
        id
    }

    /// Transport acknowledgement for the session's outstanding write.
    pub fn on_write_done(&self, id: SessionId, ok: bool) {
        match self.inner.registry.complete_delivery(id, ok) {
            DeliveryAck::Advanced => {
                let outcome = if ok { "ok" } else { "failed" };
                counter!("beach_chat_deliveries_total", 1, "outcome" => outcome);
            }
            DeliveryAck::Failed(handle) => {
                counter!("beach_chat_deliveries_total", 1, "outcome" => "failed");
                warn!(session_id = %id, "delivery failed; finishing session");
                if let Some(status) = FinishReason::DeliveryFailed.stream_status() {
                    handle.finish(status);
                }
            }
            DeliveryAck::Unknown => {
                warn!(session_id = %id, ok, "write acknowledgement for unknown session");
                return;
            }
        }
        self.wake();
    }

    /// The subscriber went away or its call was cancelled.
    pub fn cancel_session(&self, id: SessionId) -> bool {
        self.finish_session(id, FinishReason::Cancelled)
    }

    /// The transport reports the call as fully done.
    pub fn complete_session(&self, id: SessionId) -> bool {
        self.finish_session(id, FinishReason::Completed)
    }

    /// Ends a subscriber's stream from the server side with an OK status.
    pub fn end_session(&self, id: SessionId) -> bool {
        self.finish_session(id, FinishReason::EndRequested)
    }

    fn finish_session(&self, id: SessionId, reason: FinishReason) -> bool {
        let Some(handle) = self.inner.registry.mark_finished(id, reason) else {
            return false;
        };
        info!(session_id = %id, reason = reason.label(), "session finishing");
        if let Some(status) = reason.stream_status() {
            handle.finish(status);
        }
        self.wake();
        true
    }

    /// Ends every stream and stops the dispatcher.
    pub fn shutdown(&self) {
        // Set before the sweep so a concurrent registration either lands in
        // the sweep or sees the flag.
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let handles = self.inner.registry.finish_all(FinishReason::EndRequested);
        info!(sessions = handles.len(), "shutting down chat service");
        for handle in handles {
            if let Some(status) = FinishReason::EndRequested.stream_status() {
                handle.finish(status);
            }
        }
        self.wake();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Copy of the whole log, in order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.log.snapshot()
    }

    pub fn log_len(&self) -> usize {
        self.inner.log.len()
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.registry.snapshot()
    }

    pub(crate) fn log(&self) -> &MessageLog {
        &self.inner.log
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub(crate) async fn woken(&self) {
        self.inner.wake.notified().await;
    }

    fn wake(&self) {
        self.inner.wake.notify_one();
    }
}

impl Default for ChatService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingHandle;
    use beach_chat_core::StreamStatus;

    #[test_timeout::timeout]
    fn sends_land_in_call_order() {
        let service = ChatService::default();
        for n in 1..=3 {
            let ack = service.send("user", format!("Hello, World {n}"));
            assert_eq!(ack.position, n - 1);
            assert_eq!(ack.result, "OK");
        }
        let messages = service.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::new("user", "Hello, World 1"));
        assert_eq!(messages[1], ChatMessage::new("user", "Hello, World 2"));
        assert_eq!(messages[2], ChatMessage::new("user", "Hello, World 3"));
    }

    #[test_timeout::timeout]
    fn empty_fields_are_accepted() {
        let service = ChatService::default();
        service.send("", "");
        assert_eq!(service.messages(), vec![ChatMessage::new("", "")]);
    }

    #[test_timeout::timeout]
    fn registration_appends_join_and_skips_it() {
        let service = ChatService::default();
        service.send("someone", "before");
        let id = service.open_session("alice", Arc::new(RecordingHandle::default()));
        assert_eq!(
            service.messages()[1],
            ChatMessage::new("System", "alice has joined the chat!")
        );
        let sessions = service.sessions();
        assert_eq!(sessions[0].session_id, id);
        assert_eq!(sessions[0].cursor, 2);
    }

    #[test_timeout::timeout]
    fn quiet_registration_replays_from_start() {
        let service = ChatService::new(ServiceConfig {
            announce_membership: false,
            ..ServiceConfig::default()
        });
        service.send("user", "Hello, World 4");
        service.open_session("user", Arc::new(RecordingHandle::default()));
        assert_eq!(service.log_len(), 1);
        assert_eq!(service.sessions()[0].cursor, 0);
    }

    #[test_timeout::timeout]
    fn finish_triggers_transport_once() {
        let service = ChatService::default();
        let handle = Arc::new(RecordingHandle::default());
        let id = service.open_session("alice", handle.clone());
        assert!(service.cancel_session(id));
        assert!(!service.end_session(id));
        assert!(!service.complete_session(id));
        assert_eq!(handle.finished(), vec![StreamStatus::Cancelled]);
    }

    #[test_timeout::timeout]
    fn completion_does_not_refinish_transport() {
        let service = ChatService::default();
        let handle = Arc::new(RecordingHandle::default());
        let id = service.open_session("alice", handle.clone());
        assert!(service.complete_session(id));
        assert!(handle.finished().is_empty());
    }

    #[test_timeout::timeout]
    fn shutdown_finishes_active_sessions_ok() {
        let service = ChatService::default();
        let first = Arc::new(RecordingHandle::default());
        let second = Arc::new(RecordingHandle::default());
        service.open_session("a", first.clone());
        let b = service.open_session("b", second.clone());
        service.cancel_session(b);

        service.shutdown();
        assert!(service.is_shut_down());
        assert_eq!(first.finished(), vec![StreamStatus::Ok]);
        assert_eq!(second.finished(), vec![StreamStatus::Cancelled]);
    }

    #[test_timeout::timeout]
    fn registration_after_shutdown_is_ended_at_once() {
        let service = ChatService::default();
        service.shutdown();
        let handle = Arc::new(RecordingHandle::default());
        service.open_session("straggler", handle.clone());
        assert_eq!(handle.finished(), vec![StreamStatus::Ok]);
        assert_eq!(service.sessions()[0].lifecycle, crate::Lifecycle::Finished);
    }

    #[test_timeout::timeout]
    fn decoded_request_is_published_as_is() {
        let service = ChatService::default();
        let request = beach_chat_core::SendRequest {
            name: "carol".into(),
            message: "hi".into(),
        };
        let ack = service.publish(ChatMessage::from(request));
        assert_eq!(ack.position, 0);
        assert_eq!(service.messages(), vec![ChatMessage::new("carol", "hi")]);
    }
}
