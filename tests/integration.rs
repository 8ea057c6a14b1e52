//! End-to-end scenarios driving a real `TcpServer` over a loopback
//! socket with a real `WebSocketClient`, rather than exercising codecs
//! and handlers in isolation the way each module's own unit tests do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidewire::client::WebSocketClient;
use tidewire::config::{ClientConfig, PeerConfig, ServerConfig, WebSocketConfig};
use tidewire::envelope::Envelope;
use tidewire::message::{Message, MessageKind};
use tidewire::msg_server::{MessageHandler, MessageProcessor};
use tidewire::peer::{Peer, PeerState};
use tidewire::server::{Handler, TcpServer};
use tidewire::ws_server::{encode_message, WsCodec};

async fn bind_ephemeral() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

struct EchoMessages;

impl Handler<Message> for EchoMessages {
    fn handle(&self, _cid: u64, item: Message) -> Option<Vec<u8>> {
        Some(encode_message(item))
    }
}

#[tokio::test]
async fn websocket_echo_round_trip() {
    let config = ServerConfig {
        num_workers: 2,
        shutdown_grace: Duration::from_millis(20),
        ..ServerConfig::default()
    };
    let server = TcpServer::new(config, EchoMessages, || WsCodec::new(WebSocketConfig::default()));
    let addr = bind_ephemeral().await;

    let server_for_run = server.clone();
    tokio::spawn(async move {
        let _ = server_for_run.run(addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = WebSocketClient::new(ClientConfig::default());
    client.connect(&format!("ws://{addr}/")).await.unwrap();
    client.send_text("hello there").await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.recv_msg())
        .await
        .expect("server replied before the timeout")
        .unwrap()
        .expect("connection stayed open");

    assert_eq!(reply.kind, MessageKind::Text);
    assert_eq!(reply.as_text().unwrap(), "hello there");

    client.disconnect().await.unwrap();
    server.stop().await;
}

struct EchoEnvelope;
impl MessageProcessor for EchoEnvelope {
    fn process(&self, _cid: u64, msg: Envelope) -> Option<Envelope> {
        Some(msg)
    }
}

#[tokio::test]
async fn structured_message_round_trip() {
    let config = ServerConfig {
        num_workers: 2,
        shutdown_grace: Duration::from_millis(20),
        ..ServerConfig::default()
    };
    let server = TcpServer::new(config, MessageHandler::new(EchoEnvelope), || {
        WsCodec::new(WebSocketConfig::default())
    });
    let addr = bind_ephemeral().await;

    let server_for_run = server.clone();
    tokio::spawn(async move {
        let _ = server_for_run.run(addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = WebSocketClient::new(ClientConfig::default());
    client.connect(&format!("ws://{addr}/")).await.unwrap();

    let mut sent = Envelope::new(b"content".to_vec());
    sent.routing.set("to", "mike");
    sent.headers.set("id", "test");
    client.send_binary(&sent.to_mpack()).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.recv_msg())
        .await
        .expect("server replied before the timeout")
        .unwrap()
        .expect("connection stayed open");

    assert_eq!(reply.kind, MessageKind::Binary);
    let decoded = Envelope::from_mpack(&reply.data);
    assert!(decoded.flags.is_set(tidewire::envelope::Flags::VALID));
    assert_eq!(decoded.routing.get("to"), Some("mike"));
    assert_eq!(decoded.headers.get("id"), Some("test"));
    assert_eq!(decoded.content, b"content");

    client.disconnect().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn peer_connects_and_delivers_messages_from_the_hub() {
    let calls = Arc::new(AtomicUsize::new(0));

    struct Broadcast {
        calls: Arc<AtomicUsize>,
    }
    impl Handler<Message> for Broadcast {
        fn handle(&self, _cid: u64, item: Message) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(encode_message(item))
        }
    }

    let config = ServerConfig {
        num_workers: 2,
        shutdown_grace: Duration::from_millis(20),
        ..ServerConfig::default()
    };
    let server = TcpServer::new(
        config,
        Broadcast { calls: calls.clone() },
        || WsCodec::new(WebSocketConfig::default()),
    );
    let addr = bind_ephemeral().await;

    let server_for_run = server.clone();
    tokio::spawn(async move {
        let _ = server_for_run.run(addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let peer_config = PeerConfig::new(addr.ip().to_string(), addr.port());
    let peer = Arc::new(Peer::new(peer_config, ClientConfig::default()));
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let received = Arc::new(AtomicUsize::new(0));
    let run_peer = peer.clone();
    let run_shutdown = shutdown.clone();
    let run_received = received.clone();
    let handle = tokio::spawn(async move {
        run_peer
            .run(run_shutdown, move |_msg| {
                run_received.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.state().await, PeerState::Connected);

    shutdown.notify_waiters();
    let _ = handle.await;
    server.stop().await;
}
