//! A WebSocket (RFC 6455) client/server implementation for the Tokio
//! stack, with a higher-level structured-message layer on top.
//!
//! The lower layers give you an ordinary WebSocket client connection
//! ([`client::WebSocketClient`]) and a non-blocking TCP server
//! ([`server::TcpServer`]) that decodes WebSocket frames
//! ([`ws_server::WsCodec`]) and reassembles messages before handing
//! them to a fixed worker pool. On top of that, [`envelope::Envelope`]
//! is a structured message — routing map, header map, binary content —
//! serializable as MessagePack or JSON, with [`msg_server`] wiring
//! decode/dispatch/encode of that container into the same server, and
//! [`rpc::RpcClient`] giving request/response correlation over it.
//! [`peer`] lets a server also dial out to sibling servers as an
//! ordinary client, reconnecting with backoff.

pub mod buffer;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod msg_server;
pub mod ordered_map;
pub mod peer;
pub mod rpc;
pub mod server;
pub mod stream;
pub mod ws_server;

pub use client::WebSocketClient;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use message::Message;
pub use msg_server::MessageServer;
pub use peer::{Peer, PeerSupervisor};
pub use rpc::RpcClient;
pub use server::TcpServer;
pub use ws_server::WsServer;
