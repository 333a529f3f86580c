//! End-to-end runs of the chat server against the real client over HTTP and
//! WebSocket on a local port.

mod support;

use std::sync::Arc;

use beach_chat_client::{ChatMessage, ReceiveStatus};
use beach_chat_server::ServiceConfig;
use parking_lot::Mutex;
use support::{eventually, TestServer};

#[test_timeout::tokio_timeout_test(20)]
async fn single_send_is_logged() {
    let server = TestServer::start().await;
    let chatter = server.client("user");

    let ack = chatter.send("Hello, World!").await.expect("send");
    assert_eq!(ack.result, "OK");

    let messages = server.service.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0], ChatMessage::new("user", "Hello, World!"));
    server.stop().await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn sequential_sends_keep_order() {
    let server = TestServer::start().await;
    let chatter = server.client("user");

    for n in 1..=3 {
        chatter
            .send(format!("Hello, World {n}"))
            .await
            .expect("send");
    }

    let messages = server.service.messages();
    assert_eq!(messages.len(), 3);
    for (index, message) in messages.iter().enumerate() {
        assert_eq!(message.sender, "user");
        assert_eq!(message.body, format!("Hello, World {}", index + 1));
    }
    server.stop().await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn quiet_reader_sees_its_own_message_then_ends() {
    let server = TestServer::start_with(ServiceConfig {
        announce_membership: false,
        ..ServiceConfig::default()
    })
    .await;
    let chatter = server.client("user");

    chatter.send("Hello, World 4").await.expect("send");
    let session = chatter.read_chat().await.expect("read chat");
    eventually(|| session.last_message().is_some()).await;

    assert!(session.request_end());
    let status = session.wait().await;
    assert_eq!(status, ReceiveStatus::EndedByRequest);
    assert!(status.is_ok());
    assert_eq!(
        session.last_message(),
        Some(ChatMessage::new("user", "Hello, World 4"))
    );
    session.join().await;

    eventually(|| server.service.sessions().is_empty()).await;
    assert_eq!(
        server.service.messages(),
        vec![ChatMessage::new("user", "Hello, World 4")]
    );
    server.stop().await;
}

#[test_timeout::tokio_timeout_test(30)]
async fn two_subscribers_see_each_other() {
    let server = TestServer::start().await;
    let user1 = server.client("user1");
    let user2 = server.client("user2");

    let session1 = user1.read_chat().await.expect("user1 read");
    eventually(|| server.service.sessions().len() == 1).await;
    let session2 = user2.read_chat().await.expect("user2 read");
    eventually(|| server.service.sessions().len() == 2).await;

    user1.send("hi from user1").await.expect("user1 send");
    user2.send("hi from user2").await.expect("user2 send");

    let from_user2 = ChatMessage::new("user2", "hi from user2");
    eventually(|| session1.last_message().as_ref() == Some(&from_user2)).await;

    session1.request_end();
    assert_eq!(session1.wait().await, ReceiveStatus::EndedByRequest);
    assert_eq!(session1.last_message(), Some(from_user2));
    session1.join().await;

    eventually(|| server.service.log_len() == 5).await;
    session2.request_end();
    session2.join().await;
    eventually(|| server.service.log_len() == 6).await;

    assert_eq!(
        server.bodies(),
        vec![
            "user1 has joined the chat!",
            "user2 has joined the chat!",
            "hi from user1",
            "hi from user2",
            "user1 has left the chat!",
            "user2 has left the chat!",
        ]
    );
    server.stop().await;
}

#[test_timeout::tokio_timeout_test(30)]
async fn subscriber_receives_gapless_log_under_concurrent_sends() {
    let server = TestServer::start().await;
    let reader = server.client("reader");

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let session = reader
        .read_chat_with(move |message| sink.lock().push(message.clone()))
        .await
        .expect("read chat");
    eventually(|| server.service.sessions().len() == 1).await;
    let start = server.service.sessions()[0].cursor;

    let senders: Vec<_> = ["alpha", "beta"]
        .into_iter()
        .map(|name| {
            let client = server.client(name);
            tokio::spawn(async move {
                for n in 0..20 {
                    client.send(format!("{name} {n}")).await.expect("send");
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.expect("sender task");
    }

    let expected_len = server.service.log_len() - start;
    eventually(|| received.lock().len() == expected_len).await;
    assert_eq!(*received.lock(), server.service.messages()[start..].to_vec());

    session.request_end();
    session.join().await;
    server.stop().await;
}
