use anyhow::{Context, Result};
use beach_chat_server::{config, serve, ChatService, Cli, ServerConfig};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::info;

mod telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = config::exit_code(&err);
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let config = ServerConfig::try_from(cli)?;
    let telemetry = telemetry::Telemetry::init()?;

    info!(
        listen_addr = %config.listen_addr,
        announce_membership = config.service.announce_membership,
        shutdown_grace_secs = config.service.shutdown_grace.as_secs(),
        "starting beach-chat server"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("beach-chat listening on {}", config.listen_addr);

    let service = ChatService::new(config.service.clone());
    serve(listener, service, Some(metrics), shutdown_signal())
        .await
        .context("server shutdown with error")?;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
