#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use beach_chat_client::{ChatClient, ClientConfig};
use beach_chat_server::{serve, ChatService, ServiceConfig};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

/// A chat server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub service: ChatService,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServiceConfig::default()).await
    }

    pub async fn start_with(config: ServiceConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let service = ChatService::new(config);
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, service.clone(), None, async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            service,
            stop: Some(stop),
            task,
        }
    }

    pub fn client(&self, user_name: &str) -> ChatClient {
        ChatClient::new(
            user_name,
            ClientConfig {
                server: self.addr.to_string(),
            },
        )
        .expect("chat client")
    }

    pub fn bodies(&self) -> Vec<String> {
        self.service
            .messages()
            .into_iter()
            .map(|message| message.body)
            .collect()
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
            .await
            .expect("server task")
            .expect("server result");
    }
}

/// Polls `condition` until it holds; the surrounding test timeout bounds it.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
