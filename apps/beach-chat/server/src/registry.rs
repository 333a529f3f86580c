use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use beach_chat_core::ChatMessage;
use parking_lot::Mutex;

use crate::{
    log::MessageLog,
    session::{DeliveryHandle, FinishReason, Lifecycle, Session, SessionId},
};

/// Every live subscriber session, keyed by registration order.
///
/// The registry lock is held only for bookkeeping. Transport calls happen
/// after it is released, and the only other lock taken underneath it is the
/// message log's.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, Session>>,
    next_id: AtomicU64,
}

/// A write claimed during a dispatch pass, to be started once the registry
/// lock is released.
pub struct PendingDelivery {
    pub session_id: SessionId,
    pub handle: Arc<dyn DeliveryHandle>,
    pub message: ChatMessage,
}

pub enum DeliveryAck {
    Advanced,
    /// The failed write ended the session; the handle still needs finishing.
    Failed(Arc<dyn DeliveryHandle>),
    Unknown,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub subscriber: String,
    pub cursor: usize,
    pub lifecycle: Lifecycle,
    pub outstanding: bool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        subscriber: String,
        cursor: usize,
        handle: Arc<dyn DeliveryHandle>,
    ) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(id, subscriber, cursor, handle);
        self.sessions.lock().insert(id, session);
        id
    }

    /// Returns the session's handle when this call is the one that ended it.
    pub fn mark_finished(
        &self,
        id: SessionId,
        reason: FinishReason,
    ) -> Option<Arc<dyn DeliveryHandle>> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id)?;
        session
            .mark_finished(reason)
            .then(|| Arc::clone(session.handle()))
    }

    /// Removes every finished, drained session in registration order, calling
    /// `on_removed` for each one just before it leaves the map.
    pub fn prune(&self, mut on_removed: impl FnMut(&Session)) -> usize {
        let mut sessions = self.sessions.lock();
        let removable: Vec<SessionId> = sessions
            .values()
            .filter(|session| session.is_removable())
            .map(Session::id)
            .collect();
        for id in &removable {
            if let Some(session) = sessions.get(id) {
                on_removed(session);
            }
            sessions.remove(id);
        }
        removable.len()
    }

    /// Claims the next log entry for every idle, active session that is behind.
    pub fn begin_deliveries(&self, log: &MessageLog) -> Vec<PendingDelivery> {
        let mut sessions = self.sessions.lock();
        let log_len = log.len();
        let mut pending = Vec::new();
        for session in sessions.values_mut() {
            let Some(cursor) = session.begin_delivery(log_len) else {
                continue;
            };
            match log.slice(cursor).next() {
                Some(message) => pending.push(PendingDelivery {
                    session_id: session.id(),
                    handle: Arc::clone(session.handle()),
                    message,
                }),
                None => session.abandon_delivery(),
            }
        }
        pending
    }

    pub fn complete_delivery(&self, id: SessionId, ok: bool) -> DeliveryAck {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(&id) else {
            return DeliveryAck::Unknown;
        };
        if session.complete_delivery(ok) {
            DeliveryAck::Failed(Arc::clone(session.handle()))
        } else {
            DeliveryAck::Advanced
        }
    }

    /// Ends every active session, returning the handles that need finishing.
    pub fn finish_all(&self, reason: FinishReason) -> Vec<Arc<dyn DeliveryHandle>> {
        let mut sessions = self.sessions.lock();
        sessions
            .values_mut()
            .filter_map(|session| {
                session
                    .mark_finished(reason)
                    .then(|| Arc::clone(session.handle()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .lock()
            .values()
            .map(|session| SessionSnapshot {
                session_id: session.id(),
                subscriber: session.subscriber().to_string(),
                cursor: session.cursor(),
                lifecycle: session.lifecycle(),
                outstanding: session.has_outstanding_delivery(),
            })
            .collect()
    }
}
