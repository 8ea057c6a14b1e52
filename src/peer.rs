//! Outbound peering (§4.8): a server may declare sibling servers it
//! dials out to as a plain WebSocket client, maintaining the connection
//! across failures with exponential backoff. Grounded on `client.rs`'s
//! `WebSocketClient` for the connection itself; the reconnect loop has
//! no teacher counterpart (socket-flow is dial-in only) and follows the
//! state machine named directly in the design notes instead —
//! `DISCONNECTED -> CONNECTING -> CONNECTED`, dropping to `BACKOFF` on
//! failure and resetting the delay on a successful connect.

use crate::client::WebSocketClient;
use crate::config::{ClientConfig, PeerConfig};
use crate::message::Message;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// One outbound connection to a peer, reconnected with exponential
/// backoff whenever it drops. Inbound messages are handed to an
/// `on_message` callback exactly as an ordinary server connection would
/// hand its frames to a worker (§4.8 — "processed exactly like regular
/// server connections").
pub struct Peer {
    config: PeerConfig,
    client_config: ClientConfig,
    state: Arc<RwLock<PeerState>>,
}

impl Peer {
    pub fn new(config: PeerConfig, client_config: ClientConfig) -> Self {
        Self {
            config,
            client_config,
            state: Arc::new(RwLock::new(PeerState::Disconnected)),
        }
    }

    pub async fn state(&self) -> PeerState {
        *self.state.read().await
    }

    fn uri(&self) -> String {
        format!("ws://{}:{}/", self.config.host, self.config.port)
    }

    /// Runs the connect/reconnect loop until `shutdown` is notified.
    /// `on_message` is called for each reassembled message from the
    /// peer; a panic inside it is not caught here — callers composing a
    /// peer with a worker-backed handler should do their own
    /// catch_unwind, same as the main server's worker loop does.
    pub async fn run<F>(&self, shutdown: Arc<Notify>, mut on_message: F)
    where
        F: FnMut(Message) + Send,
    {
        let mut backoff = self.config.initial_backoff;

        loop {
            *self.state.write().await = PeerState::Connecting;
            let mut client = WebSocketClient::new(self.client_config.clone());

            let connected = tokio::select! {
                _ = shutdown.notified() => return,
                result = client.connect(&self.uri()) => result.is_ok(),
            };

            if connected {
                *self.state.write().await = PeerState::Connected;
                backoff = self.config.initial_backoff;

                loop {
                    let next = tokio::select! {
                        _ = shutdown.notified() => {
                            let _ = client.disconnect().await;
                            return;
                        }
                        msg = client.recv_msg() => msg,
                    };
                    match next {
                        Ok(Some(msg)) => on_message(msg),
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
            }

            *self.state.write().await = PeerState::Backoff;
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }
}

/// Owns a server's full set of declared peers (§4.8), spawning one
/// reconnect loop per peer and sharing a single `on_message` callback
/// across all of them — the callback sees which peer a message came
/// from only via whatever the message itself says, matching "inbound
/// traffic is processed exactly like regular server connections"
/// rather than one callback per peer.
pub struct PeerSupervisor {
    peers: Vec<Arc<Peer>>,
    shutdown: Arc<Notify>,
}

impl PeerSupervisor {
    pub fn new(configs: Vec<PeerConfig>, client_config: ClientConfig) -> Self {
        let peers = configs
            .into_iter()
            .map(|c| Arc::new(Peer::new(c, client_config.clone())))
            .collect();
        Self {
            peers,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    /// Spawns every peer's reconnect loop, each invoking `on_message`.
    /// Returns the join handles so callers can await a clean shutdown.
    pub fn spawn_all<F>(&self, on_message: F) -> Vec<tokio::task::JoinHandle<()>>
    where
        F: Fn(Message) + Send + Sync + Clone + 'static,
    {
        self.peers
            .iter()
            .map(|peer| {
                let peer = peer.clone();
                let shutdown = self.shutdown.clone();
                let on_message = on_message.clone();
                tokio::spawn(async move {
                    peer.run(shutdown, move |msg| on_message(msg)).await;
                })
            })
            .collect()
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fresh_peer_starts_disconnected() {
        let peer = Peer::new(PeerConfig::new("localhost", 9999), ClientConfig::default());
        assert_eq!(peer.state().await, PeerState::Disconnected);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Duration::from_millis(100);
        let cap = Duration::from_secs(30);
        for _ in 0..20 {
            backoff = (backoff * 2).min(cap);
        }
        assert_eq!(backoff, cap);
    }

    #[tokio::test]
    async fn unreachable_peer_eventually_reaches_backoff_state() {
        let config = PeerConfig::new("127.0.0.1", 1); // nothing listens on port 1
        let peer = Arc::new(Peer::new(config, ClientConfig::default()));
        let shutdown = Arc::new(Notify::new());

        let run_peer = peer.clone();
        let run_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            run_peer.run(run_shutdown, |_msg: Message| {}).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(peer.state().await, PeerState::Backoff);

        shutdown.notify_waiters();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn supervisor_spawns_one_loop_per_declared_peer() {
        let supervisor = PeerSupervisor::new(
            vec![
                PeerConfig::new("127.0.0.1", 1),
                PeerConfig::new("127.0.0.1", 2),
            ],
            ClientConfig::default(),
        );
        assert_eq!(supervisor.peers().len(), 2);

        let handles = supervisor.spawn_all(|_msg| {});
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        for peer in supervisor.peers() {
            assert_eq!(peer.state().await, PeerState::Backoff);
        }

        supervisor.stop();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
