//! A thin request/response helper over a structured-message client
//! connection (§4.9): `exec` stamps a correlation id header on the
//! outgoing message, sends it, and waits for a reply whose own
//! correlation id matches — anything else arriving on the connection in
//! the meantime is discarded. No teacher counterpart (socket-flow has
//! no structured-message layer at all); grounded directly on
//! `client.rs`'s `WebSocketClient` and `envelope.rs`'s `Envelope`.

use crate::client::WebSocketClient;
use crate::envelope::{Envelope, Format};
use crate::message::MessageKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const CORRELATION_HEADER: &str = "id";

pub struct RpcClient {
    client: WebSocketClient,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(client: WebSocketClient) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn client_mut(&mut self) -> &mut WebSocketClient {
        &mut self.client
    }

    /// Sends `msg` with a fresh correlation id and waits up to `timeout`
    /// for a reply carrying the same id. Returns `None` on timeout,
    /// connection close, or send/decode failure.
    pub async fn exec(&mut self, mut msg: Envelope, timeout: Duration) -> Option<Envelope> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        msg.headers.set(CORRELATION_HEADER, &id);

        let sent = match msg.format {
            Format::Mpack => self.client.send_binary(&msg.to_mpack()).await,
            Format::Json => self.client.send_text(&msg.to_json()).await,
        };
        if sent.is_err() {
            return None;
        }

        tokio::time::timeout(timeout, self.wait_for_reply(&id))
            .await
            .ok()
            .flatten()
    }

    async fn wait_for_reply(&mut self, id: &str) -> Option<Envelope> {
        loop {
            let wsmsg = match self.client.recv_msg().await {
                Ok(Some(m)) => m,
                _ => return None,
            };
            let envelope = match wsmsg.kind {
                MessageKind::Binary => Envelope::from_mpack(&wsmsg.data),
                MessageKind::Text => Envelope::from_json(&String::from_utf8_lossy(&wsmsg.data)),
            };
            if envelope.headers.get(CORRELATION_HEADER) == Some(id) {
                return Some(envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[tokio::test]
    async fn exec_on_unopened_client_fails_fast() {
        let mut rpc = RpcClient::new(WebSocketClient::new(ClientConfig::default()));
        let reply = rpc
            .exec(Envelope::new(b"hi".to_vec()), Duration::from_millis(50))
            .await;
        assert!(reply.is_none());
    }

    #[test]
    fn fresh_ids_are_monotonic_and_unique() {
        let rpc = RpcClient::new(WebSocketClient::new(ClientConfig::default()));
        let a = rpc.next_id.fetch_add(1, Ordering::Relaxed);
        let b = rpc.next_id.fetch_add(1, Ordering::Relaxed);
        assert_ne!(a, b);
    }
}
