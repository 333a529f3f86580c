use std::fmt;

use beach_chat_core::{ChatMessage, StreamStatus};
use parking_lot::Mutex;
use tokio::sync::watch;

/// How a receive session ended, as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The server finished the stream normally.
    Ok,
    /// The application asked for the end itself.
    EndedByRequest,
    /// The server finished the stream as cancelled.
    Cancelled,
    /// The stream broke or the server reported a failure.
    Failed(String),
}

impl ReceiveStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReceiveStatus::Ok | ReceiveStatus::EndedByRequest)
    }
}

impl From<StreamStatus> for ReceiveStatus {
    fn from(status: StreamStatus) -> Self {
        match status {
            StreamStatus::Ok => ReceiveStatus::Ok,
            StreamStatus::Cancelled => ReceiveStatus::Cancelled,
            StreamStatus::Unknown(reason) => ReceiveStatus::Failed(reason),
        }
    }
}

impl fmt::Display for ReceiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveStatus::Ok | ReceiveStatus::EndedByRequest => f.write_str("OK"),
            ReceiveStatus::Cancelled => f.write_str("Cancelled"),
            ReceiveStatus::Failed(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Resolution {
    outcome: Option<ReceiveStatus>,
    end_requested: bool,
}

/// Hands the end of a receive stream from the callback side to whoever is
/// waiting on it.
///
/// The pump reports inbound messages with [`on_read`](Self::on_read) and the
/// stream's completion with [`on_done`](Self::on_done); the application waits
/// with [`wait`](Self::wait) and may cut the session short with
/// [`request_end`](Self::request_end). Completion and the end request race;
/// whichever reaches the shared state first decides the outcome and the
/// other becomes a no-op.
#[derive(Debug)]
pub struct ReceiveCoordinator {
    last_message: Mutex<Option<ChatMessage>>,
    resolution: watch::Sender<Resolution>,
}

impl Default for ReceiveCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveCoordinator {
    pub fn new() -> Self {
        let (resolution, _) = watch::channel(Resolution::default());
        Self {
            last_message: Mutex::new(None),
            resolution,
        }
    }

    pub fn on_read(&self, message: ChatMessage) {
        *self.last_message.lock() = Some(message);
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.last_message.lock().clone()
    }

    /// Resolves with the transport's outcome. Returns `false` if the session
    /// had already been resolved.
    pub fn on_done(&self, status: ReceiveStatus) -> bool {
        self.resolve(status, false)
    }

    /// Resolves with [`ReceiveStatus::EndedByRequest`]. Returns `false` if the
    /// transport got there first or the end was already requested.
    pub fn request_end(&self) -> bool {
        self.resolve(ReceiveStatus::EndedByRequest, true)
    }

    pub fn end_requested(&self) -> bool {
        self.resolution.borrow().end_requested
    }

    pub fn outcome(&self) -> Option<ReceiveStatus> {
        self.resolution.borrow().outcome.clone()
    }

    /// Waits until the session is resolved.
    pub async fn wait(&self) -> ReceiveStatus {
        let mut rx = self.resolution.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().outcome.clone() {
                return outcome;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return ReceiveStatus::Failed("receive coordinator dropped".to_string());
            }
        }
    }

    /// Blocks the calling thread until the session is resolved. Must not be
    /// called from inside an async runtime worker.
    pub fn wait_blocking(&self) -> ReceiveStatus {
        futures::executor::block_on(self.wait())
    }

    fn resolve(&self, status: ReceiveStatus, by_request: bool) -> bool {
        self.resolution.send_if_modified(|resolution| {
            if resolution.outcome.is_some() {
                return false;
            }
            resolution.outcome = Some(status);
            resolution.end_requested = by_request;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test_timeout::timeout]
    fn end_request_unblocks_waiter_without_error() {
        let coordinator = Arc::new(ReceiveCoordinator::new());
        let waiter = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.wait_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(coordinator.request_end());

        let status = waiter.join().expect("waiter thread");
        assert_eq!(status, ReceiveStatus::EndedByRequest);
        assert!(status.is_ok());
        assert!(coordinator.end_requested());
    }

    #[test_timeout::timeout]
    fn end_after_completion_is_noop() {
        let coordinator = ReceiveCoordinator::new();
        assert!(coordinator.on_done(ReceiveStatus::Cancelled));
        assert!(!coordinator.request_end());
        assert!(!coordinator.on_done(ReceiveStatus::Ok));
        assert!(!coordinator.end_requested());
        assert_eq!(coordinator.wait_blocking(), ReceiveStatus::Cancelled);
    }

    #[test_timeout::timeout]
    fn resolved_before_wait_returns_immediately() {
        let coordinator = ReceiveCoordinator::new();
        coordinator.request_end();
        assert_eq!(coordinator.wait_blocking(), ReceiveStatus::EndedByRequest);
        assert_eq!(coordinator.wait_blocking(), ReceiveStatus::EndedByRequest);
    }

    #[test_timeout::timeout]
    fn racing_resolutions_have_one_winner() {
        for _ in 0..200 {
            let coordinator = Arc::new(ReceiveCoordinator::new());
            let transport = {
                let coordinator = coordinator.clone();
                thread::spawn(move || coordinator.on_done(ReceiveStatus::Ok))
            };
            let application = {
                let coordinator = coordinator.clone();
                thread::spawn(move || coordinator.request_end())
            };
            let transport_won = transport.join().expect("transport thread");
            let application_won = application.join().expect("application thread");
            assert!(transport_won ^ application_won);

            let expected = if application_won {
                ReceiveStatus::EndedByRequest
            } else {
                ReceiveStatus::Ok
            };
            assert_eq!(coordinator.outcome(), Some(expected));
        }
    }

    #[test_timeout::timeout]
    fn last_message_tracks_latest_read() {
        let coordinator = ReceiveCoordinator::new();
        assert!(coordinator.last_message().is_none());
        coordinator.on_read(ChatMessage::new("user1", "first"));
        coordinator.on_read(ChatMessage::new("user2", "second"));
        assert_eq!(
            coordinator.last_message(),
            Some(ChatMessage::new("user2", "second"))
        );
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn async_waiters_all_observe_outcome() {
        let coordinator = Arc::new(ReceiveCoordinator::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;
        coordinator.on_done(ReceiveStatus::Failed("boom".into()));
        for waiter in waiters {
            assert_eq!(
                waiter.await.expect("waiter task"),
                ReceiveStatus::Failed("boom".into())
            );
        }
    }

    #[test_timeout::timeout]
    fn stream_status_maps_to_receive_status() {
        assert_eq!(ReceiveStatus::from(StreamStatus::Ok), ReceiveStatus::Ok);
        assert_eq!(
            ReceiveStatus::from(StreamStatus::Cancelled),
            ReceiveStatus::Cancelled
        );
        assert_eq!(
            ReceiveStatus::from(StreamStatus::Unknown("x".into())),
            ReceiveStatus::Failed("x".into())
        );
        assert!(!ReceiveStatus::Cancelled.is_ok());
    }
}
