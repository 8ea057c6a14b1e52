//! The non-blocking TCP server core (§4.5): an accept loop plus a fixed
//! worker pool, decoupled by request/response queues so a slow user
//! callback never blocks I/O. Grounded on the teacher crate's
//! `start_server_with_config` (the spawn-per-connection accept loop,
//! `tx.send(Event::...)` fan-out) generalized from "one task per
//! connection forwarding to a single event consumer" into "per-connection
//! parse task + shared worker pool", per the concurrency mapping in
//! the design notes: a tokio task stands in for an OS thread, and
//! `tokio::sync::mpsc` (with a `tokio::sync::Mutex`-guarded receiver
//! shared by the worker pool) stands in for the spec's mutex+condvar
//! queue.
//!
//! `TcpServer` itself is protocol-agnostic: a [`Codec`] turns a
//! connection's raw bytes into discrete work items (done by that
//! connection's own task, matching "only the I/O thread mutates
//! per-connection records"), and a [`Handler`] — run by the worker pool —
//! turns a work item into reply bytes. `ws_server`/`msg_server` plug in
//! the WebSocket- and structured-message-aware codecs and handlers.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::stream::{self, Socket};
use socket2::{Domain, Socket as Socket2, Type};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Halting,
    Halted,
}

/// Turns a connection's raw byte stream into discrete work items.
/// One instance lives per connection, owned by that connection's own
/// task — never shared, never locked.
pub trait Codec: Send + 'static {
    type Item: Send + 'static;

    /// Feeds newly-read bytes in and drains as many complete items as
    /// are now available. An `Err` tears the connection down (§4.5,
    /// §7: protocol errors are local to the connection).
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Self::Item>>;

    /// Bytes still buffered and not yet turned into an item, used for
    /// the high/low water mark backpressure check (§4.5).
    fn buffered_len(&self) -> usize;

    /// Bytes to write, if any, when the connection is torn down (e.g. a
    /// CLOSE frame).
    fn on_close(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Bytes to write, if any, when `feed` itself returned `err` — a
    /// CLOSE(1002/1007) frame for a WebSocket codec, say — written before
    /// the connection is torn down rather than aborting the TCP socket
    /// with nothing on the wire (§4.2, §7 propagation policy). Default:
    /// nothing, for codecs with no such framing.
    fn error_close(&mut self, err: &Error) -> Option<Vec<u8>> {
        let _ = err;
        None
    }

    /// Bytes the codec wants written immediately — a handshake response,
    /// a PONG, a CLOSE echo — bypassing the worker queue entirely since
    /// these are protocol-level replies, not application responses
    /// subject to the per-cid response ordering guarantee (§5).
    fn drain_immediate(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Executed by a worker thread (task) for each dequeued item (§4.5).
/// Implementations must not panic across connections; a panic inside
/// `handle` is caught by the worker loop and logged, never propagated
/// into the accept loop.
pub trait Handler<I>: Send + Sync + 'static {
    fn handle(&self, cid: u64, item: I) -> Option<Vec<u8>>;
}

struct ConnectionRecord {
    egress: mpsc::UnboundedSender<Vec<u8>>,
    next_seq_out: u64,
    reorder: BTreeMap<u64, Option<Vec<u8>>>,
}

/// Non-blocking TCP server: accept loop + fixed worker pool (§4.5).
pub struct TcpServer<C, H>
where
    C: Codec,
    H: Handler<C::Item>,
{
    config: ServerConfig,
    handler: Arc<H>,
    codec_factory: Arc<dyn Fn() -> C + Send + Sync>,
    lifecycle: Arc<RwLock<Lifecycle>>,
    connections: Arc<AsyncMutex<HashMap<u64, ConnectionRecord>>>,
    next_cid: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    worker_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<C, H> TcpServer<C, H>
where
    C: Codec,
    H: Handler<C::Item>,
{
    pub fn new(
        config: ServerConfig,
        handler: H,
        codec_factory: impl Fn() -> C + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            codec_factory: Arc::new(codec_factory),
            lifecycle: Arc::new(RwLock::new(Lifecycle::Halted)),
            connections: Arc::new(AsyncMutex::new(HashMap::new())),
            next_cid: Arc::new(AtomicU64::new(1)),
            shutdown: Arc::new(Notify::new()),
            worker_handles: AsyncMutex::new(Vec::new()),
        })
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().await
    }

    pub fn connection_count(&self) -> usize {
        // best-effort; exact count requires the async lock
        self.connections.try_lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Signals shutdown (§4.5): `run`'s accept loop stops, in-flight
    /// connections get a grace period, then worker tasks are joined.
    pub async fn stop(&self) {
        *self.lifecycle.write().await = Lifecycle::Halting;
        self.shutdown.notify_waiters();
    }

    /// Runs the accept loop. Blocks until [`Self::stop`] is called (or an
    /// unrecoverable bind error occurs), mirroring `run`'s blocking
    /// contract from §4.5.
    pub async fn run(self: Arc<Self>, addr: impl ToSocketAddrs) -> Result<()> {
        let resolved = tokio::net::lookup_host(addr)
            .await
            .map_err(Error::from)?
            .next()
            .ok_or_else(|| {
                Error::from(io::Error::new(io::ErrorKind::InvalidInput, "no address to bind"))
            })?;
        let listener = bind_listener(resolved, self.config.backlog)?;
        *self.lifecycle.write().await = Lifecycle::Running;

        let (req_tx, req_rx) = mpsc::channel::<(u64, u64, C::Item)>(self.config.queue_capacity);
        let req_rx = Arc::new(AsyncMutex::new(req_rx));

        {
            let mut handles = self.worker_handles.lock().await;
            for _ in 0..self.config.effective_num_workers() {
                let req_rx = req_rx.clone();
                let server = self.clone();
                handles.push(tokio::spawn(async move {
                    loop {
                        let next = { req_rx.lock().await.recv().await };
                        let (cid, seq, item) = match next {
                            Some(v) => v,
                            None => break,
                        };
                        let reply = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                            server.handler.handle(cid, item)
                        })) {
                            Ok(reply) => reply,
                            Err(_) => {
                                log::error!("worker callback panicked for cid {cid}");
                                None
                            }
                        };
                        server.deliver(cid, seq, reply).await;
                    }
                }));
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => {
                    let (tcp, _peer) = match accepted {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(max) = self.config.max_connections {
                        if self.connection_count() >= max {
                            drop(tcp);
                            continue;
                        }
                    }

                    let _ = tcp.set_nodelay(true);
                    let cid = self.next_cid.fetch_add(1, Ordering::SeqCst);

                    let socket = if let Some(tls_cfg) = self.config.tls_config.clone() {
                        match stream::accept_tls(tcp, tls_cfg).await {
                            Ok(s) => s,
                            Err(_) => continue,
                        }
                    } else {
                        Socket::Plain(tcp)
                    };

                    self.clone().spawn_connection(cid, socket, req_tx.clone());
                }
            }
        }

        drop(req_tx);
        self.shutdown_connections().await;

        let handles = { std::mem::take(&mut *self.worker_handles.lock().await) };
        for handle in handles {
            let _ = handle.await;
        }

        *self.lifecycle.write().await = Lifecycle::Halted;
        Ok(())
    }

    fn spawn_connection(
        self: Arc<Self>,
        cid: u64,
        socket: Socket,
        req_tx: mpsc::Sender<(u64, u64, C::Item)>,
    ) {
        let (egress_tx, mut egress_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let local_egress = egress_tx.clone();
        let connections = self.connections.clone();
        let record = ConnectionRecord {
            egress: egress_tx,
            next_seq_out: 0,
            reorder: BTreeMap::new(),
        };

        tokio::spawn(async move {
            connections.lock().await.insert(cid, record);

            let (mut read_half, mut write_half) = split(socket);

            let writer = tokio::spawn(async move {
                while let Some(bytes) = egress_rx.recv().await {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                let _ = write_half.shutdown().await;
            });

            let mut codec = (self.codec_factory)();
            let mut next_seq_in: u64 = 0;
            let mut chunk = [0u8; 4096];
            let mut paused = false;

            loop {
                if paused {
                    if codec.buffered_len() <= self.config.low_water_mark {
                        paused = false;
                    } else {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        continue;
                    }
                }

                let n = tokio::select! {
                    _ = self.shutdown.notified() => break,
                    result = read_half.read(&mut chunk) => match result {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(_) => break,
                    },
                };

                let items = match codec.feed(&chunk[..n]) {
                    Ok(items) => items,
                    Err(e) => {
                        if let Some(bytes) = codec.error_close(&e) {
                            let _ = local_egress.send(bytes);
                        }
                        break;
                    }
                };

                let immediate = codec.drain_immediate();
                if !immediate.is_empty() {
                    let _ = local_egress.send(immediate);
                }

                for item in items {
                    let seq = next_seq_in;
                    next_seq_in += 1;
                    if req_tx.send((cid, seq, item)).await.is_err() {
                        break;
                    }
                }

                if codec.buffered_len() >= self.config.high_water_mark {
                    paused = true;
                }
            }

            if let Some(close_bytes) = codec.on_close() {
                let record = self.connections.lock().await.remove(&cid);
                if let Some(record) = record {
                    let _ = record.egress.send(close_bytes);
                }
            } else {
                self.connections.lock().await.remove(&cid);
            }

            drop(writer);
        });
    }

    async fn deliver(&self, cid: u64, seq: u64, reply: Option<Vec<u8>>) {
        let mut conns = self.connections.lock().await;
        let Some(record) = conns.get_mut(&cid) else {
            // cid no longer known: the response is dropped silently (§9).
            return;
        };
        record.reorder.insert(seq, reply);
        while let Some(slot) = record.reorder.remove(&record.next_seq_out) {
            if let Some(bytes) = slot {
                let _ = record.egress.send(bytes);
            }
            record.next_seq_out += 1;
        }
    }

    async fn shutdown_connections(&self) {
        tokio::time::sleep(self.config.shutdown_grace).await;
        self.connections.lock().await.clear();
    }
}

/// Binds a listener with an explicit backlog (§4.5): `socket2` sets it
/// before the socket is handed to tokio, since `TcpListener::bind` has no
/// way to express it directly.
fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket2::new(domain, Type::STREAM, None).map_err(Error::from)?;
    socket.set_reuse_address(true).map_err(Error::from)?;
    socket.bind(&addr.into()).map_err(Error::from)?;
    socket.listen(backlog as i32).map_err(Error::from)?;
    socket.set_nonblocking(true).map_err(Error::from)?;
    TcpListener::from_std(socket.into()).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct EchoCodec {
        buf: Vec<u8>,
    }

    impl Codec for EchoCodec {
        type Item = Vec<u8>;

        fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Self::Item>> {
            self.buf.extend_from_slice(bytes);
            let items = vec![std::mem::take(&mut self.buf)];
            Ok(items)
        }

        fn buffered_len(&self) -> usize {
            self.buf.len()
        }
    }

    struct EchoHandler {
        calls: AtomicUsize,
    }

    impl Handler<Vec<u8>> for EchoHandler {
        fn handle(&self, _cid: u64, item: Vec<u8>) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(item)
        }
    }

    #[tokio::test]
    async fn accepts_a_connection_and_echoes_bytes() {
        let handler = EchoHandler { calls: AtomicUsize::new(0) };
        let config = ServerConfig {
            num_workers: 2,
            shutdown_grace: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        let server = TcpServer::new(config, handler, || EchoCodec { buf: Vec::new() });
        let server_for_run = server.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let run_handle = tokio::spawn(async move {
            let _ = server_for_run.run(addr).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"hello");

        server.stop().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), run_handle).await;
    }

    #[tokio::test]
    async fn max_connections_rejects_accepts_past_the_cap() {
        let handler = EchoHandler { calls: AtomicUsize::new(0) };
        let config = ServerConfig {
            num_workers: 1,
            shutdown_grace: Duration::from_millis(20),
            max_connections: Some(1),
            ..ServerConfig::default()
        };
        let server = TcpServer::new(config, handler, || EchoCodec { buf: Vec::new() });
        let server_for_run = server.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let run_handle = tokio::spawn(async move {
            let _ = server_for_run.run(addr).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _first = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count(), 1);

        let mut second = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0, "connection past the cap should be closed immediately");

        server.stop().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), run_handle).await;
    }
}
