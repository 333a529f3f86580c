use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::Parser;

use crate::service::ServiceConfig;

#[derive(Debug, Parser)]
#[command(
    name = "beach-chat-server",
    author,
    version,
    about = "Beach chat fan-out server"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "BEACH_CHAT_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub listen_addr: String,

    /// Do not append join/leave notices; new subscribers replay the whole log.
    #[arg(long, env = "BEACH_CHAT_NO_ANNOUNCE", default_value_t = false)]
    pub no_announce: bool,

    /// Seconds to wait for in-flight writes to drain after a shutdown signal.
    #[arg(long, env = "BEACH_CHAT_SHUTDOWN_GRACE_SECS", default_value_t = 1)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub service: ServiceConfig,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        Ok(ServerConfig {
            listen_addr,
            service: ServiceConfig {
                announce_membership: !cli.no_announce,
                shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            },
        })
    }
}

/// Exit status for an argument error: 1 for bad arguments, 0 when clap was
/// only asked for help or version output.
pub fn exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_announce_on_port_9090() {
        let cli = Cli::try_parse_from(["beach-chat-server"]).expect("parse");
        let config = ServerConfig::try_from(cli).expect("config");
        assert_eq!(config.listen_addr, "0.0.0.0:9090".parse().expect("addr"));
        assert!(config.service.announce_membership);
        assert_eq!(config.service.shutdown_grace, Duration::from_secs(1));
    }

    #[test_timeout::timeout]
    fn no_announce_flag_disables_notices() {
        let cli = Cli::try_parse_from([
            "beach-chat-server",
            "--listen-addr",
            "127.0.0.1:7000",
            "--no-announce",
            "--shutdown-grace-secs",
            "5",
        ])
        .expect("parse");
        let config = ServerConfig::try_from(cli).expect("config");
        assert_eq!(config.listen_addr.port(), 7000);
        assert!(!config.service.announce_membership);
        assert_eq!(config.service.shutdown_grace, Duration::from_secs(5));
    }

    #[test_timeout::timeout]
    fn bad_arguments_exit_with_one() {
        let err = Cli::try_parse_from(["beach-chat-server", "--bogus"]).expect_err("should fail");
        assert_eq!(exit_code(&err), 1);

        let err = Cli::try_parse_from(["beach-chat-server", "--help"]).expect_err("help exits");
        assert_eq!(exit_code(&err), 0);
    }

    #[test_timeout::timeout]
    fn unparsable_address_is_rejected() {
        let cli = Cli::try_parse_from(["beach-chat-server", "--listen-addr", "nowhere"])
            .expect("parse");
        let err = ServerConfig::try_from(cli).expect_err("invalid address");
        assert!(err.to_string().contains("invalid listen address"));
    }
}
