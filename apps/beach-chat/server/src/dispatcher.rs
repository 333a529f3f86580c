use beach_chat_core::ChatMessage;
use metrics::{counter, gauge};
use tokio::{
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tracing::{info, trace, warn};

use crate::service::ChatService;

/// Drives delivery from the log to every eligible session.
///
/// The loop sleeps on the service's wake signal, so it only runs after an
/// append, a registration, a lifecycle change or a write acknowledgement.
/// Each pass starts at most one write per session; the acknowledgement wakes
/// the loop again, which lets a slow subscriber fall behind without holding
/// up the others.
pub struct Dispatcher {
    service: ChatService,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub pruned: usize,
    pub started: usize,
    pub refused: usize,
}

impl Dispatcher {
    pub fn new(service: ChatService) -> Self {
        Self { service }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!("dispatcher started");
        loop {
            self.service.woken().await;
            if self.service.is_shut_down() {
                break;
            }
            let stats = self.run_pass();
            trace!(
                pruned = stats.pruned,
                started = stats.started,
                refused = stats.refused,
                "dispatch pass complete"
            );
        }
        self.drain().await;
        info!("dispatcher stopped");
    }

    /// Keeps pruning after shutdown so every ended session still gets its
    /// leave notice. Writes that were in flight have until the configured
    /// grace period to be acknowledged.
    async fn drain(&self) {
        let deadline = Instant::now() + self.service.config().shutdown_grace;
        loop {
            self.run_pass();
            let remaining = self.service.registry().len();
            if remaining == 0 {
                break;
            }
            if timeout_at(deadline, self.service.woken()).await.is_err() {
                warn!(remaining, "shutdown grace elapsed with sessions still draining");
                break;
            }
        }
    }

    /// One prune-then-deliver sweep over the registry.
    pub fn run_pass(&self) -> PassStats {
        let log = self.service.log();
        let registry = self.service.registry();
        let announce = self.service.config().announce_membership;

        let pruned = registry.prune(|session| {
            info!(
                session_id = %session.id(),
                subscriber = %session.subscriber(),
                reason = session.finish_reason().map(|r| r.label()).unwrap_or("unknown"),
                "session removed"
            );
            if announce {
                log.append(ChatMessage::left(session.subscriber()));
                counter!("beach_chat_messages_total", 1, "kind" => "leave");
            }
        });
        if pruned > 0 {
            counter!("beach_chat_sessions_pruned_total", pruned as u64);
            gauge!("beach_chat_sessions_active", registry.len() as f64);
        }

        let pending = registry.begin_deliveries(log);
        let mut stats = PassStats {
            pruned,
            ..PassStats::default()
        };
        for delivery in pending {
            match delivery.handle.start_write(delivery.message) {
                Ok(()) => stats.started += 1,
                Err(err) => {
                    warn!(
                        session_id = %delivery.session_id,
                        error = %err,
                        "failed to start write"
                    );
                    stats.refused += 1;
                    self.service.on_write_done(delivery.session_id, false);
                }
            }
        }
        stats
    }
}
