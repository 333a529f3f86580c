//! Server side of the Beach chat fan-out service.
//!
//! [`ChatService`] owns the message log and the session registry and exposes
//! the entry points the transport calls; [`Dispatcher`] moves log entries to
//! subscribers; [`transport`] adapts both to axum.

pub mod config;
pub mod dispatcher;
pub mod log;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

use std::future::Future;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::warn;

pub use config::{Cli, ServerConfig};
pub use dispatcher::Dispatcher;
pub use log::MessageLog;
pub use registry::SessionRegistry;
pub use service::{ChatService, SendAck, ServiceConfig};
pub use session::{DeliveryError, DeliveryHandle, FinishReason, Lifecycle, SessionId};

/// Runs the dispatcher and the HTTP/WebSocket front end until `shutdown`
/// resolves, then finishes every open stream and waits, bounded by
/// [`ServiceConfig::shutdown_grace`], for those streams to drain.
pub async fn serve<F>(
    listener: TcpListener,
    service: ChatService,
    metrics: Option<PrometheusHandle>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = Dispatcher::new(service.clone()).spawn();
    let router = transport::build_router(service.clone(), metrics);

    let signal_service = service.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_service.shutdown();
        })
        .await;

    service.shutdown();
    if let Err(err) = dispatcher.await {
        warn!(error = %err, "dispatcher task failed");
    }
    result
}
