use std::io::BufRead;

use anyhow::{Context, Result};
use beach_chat_client::{ChatClient, ClientConfig, ClientError, EndHandle, SendAck};
use clap::Parser;
use tokio::runtime::Handle;

#[derive(Debug, Parser)]
#[command(name = "beach-chat", author, version, about = "Beach chat client")]
struct Cli {
    /// Name shown next to every message you send.
    user_name: String,

    /// `host:port` of the chat server.
    #[arg(long, env = "BEACH_CHAT_SERVER", default_value = "localhost:9090")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // Default to WARN so chat output is not drowned in logs.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let client = ChatClient::new(cli.user_name, ClientConfig { server: cli.server })
        .context("failed to build chat client")?;
    let session = client
        .read_chat_with(|message| println!("{}: {}", message.sender, message.body))
        .await
        .context("failed to open chat stream")?;

    let input_client = client.clone();
    let end = session.end_handle();
    let runtime = Handle::current();
    std::thread::spawn(move || read_input(input_client, end, runtime));

    let status = session.wait().await;
    println!("System: Chat ended status: {status}");
    session.join().await;
    Ok(())
}

/// Forwards stdin lines as messages until `/quit` or end of input.
fn read_input(client: ChatClient, end: EndHandle, runtime: Handle) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line == "/quit" {
            break;
        }
        println!("{}", send_report(&runtime.block_on(client.send(line))));
    }
    end.request_end();
}

fn send_report(result: &Result<SendAck, ClientError>) -> String {
    match result {
        Ok(ack) => format!("System: Message sent: {}", ack.result),
        Err(err) => format!("System: Failed to send message: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn send_report_distinguishes_failure() {
        let ok = Ok(SendAck {
            result: "OK".to_string(),
        });
        assert_eq!(send_report(&ok), "System: Message sent: OK");

        let failed = Err(ClientError::UnexpectedStatus {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        });
        let report = send_report(&failed);
        assert!(report.starts_with("System: Failed to send message:"));
        assert!(report.contains("500"));
    }

    #[test_timeout::timeout]
    fn missing_user_name_is_rejected() {
        let err = Cli::try_parse_from(["beach-chat"]).expect_err("name required");
        assert!(err.use_stderr());
    }
}
