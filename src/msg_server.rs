//! The structured-message server layer (§4.4): wraps the WebSocket
//! server so BINARY messages decode as MPACK and TEXT as JSON, hands
//! the decoded [`Envelope`] to a user callback, and re-encodes whatever
//! the callback returns in the same format and opcode as the request.
//!
//! This needs no codec of its own — [`crate::ws_server::WsCodec`]
//! already turns bytes into [`Message`]s. All the structured-message
//! behavior lives in a [`crate::server::Handler`] adapter, the same
//! seam `ws_server`'s own tests exercise with raw echo handlers.

use crate::envelope::{Envelope, Format};
use crate::frame::{self, Frame};
use crate::message::{Message, MessageKind};
use crate::server::Handler;
use crate::ws_server::WsCodec;

/// User-supplied dispatch for structured messages (§4.4's
/// `process(server, cid, msg, ctx)` callback). A `None` return sends no
/// reply.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process(&self, cid: u64, msg: Envelope) -> Option<Envelope>;
}

impl<F> MessageProcessor for F
where
    F: Fn(u64, Envelope) -> Option<Envelope> + Send + Sync + 'static,
{
    fn process(&self, cid: u64, msg: Envelope) -> Option<Envelope> {
        self(cid, msg)
    }
}

/// Adapts a [`MessageProcessor`] into a [`Handler`] over the WebSocket
/// server's `Message` items: decode per opcode, dispatch, re-encode the
/// reply in the request's own format (§4.4 — the reply format follows
/// the request, not whatever the returned `Envelope` happens to carry).
pub struct MessageHandler<P: MessageProcessor> {
    processor: P,
}

impl<P: MessageProcessor> MessageHandler<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: MessageProcessor> Handler<Message> for MessageHandler<P> {
    fn handle(&self, cid: u64, item: Message) -> Option<Vec<u8>> {
        let format = match item.kind {
            MessageKind::Binary => Format::Mpack,
            MessageKind::Text => Format::Json,
        };
        let envelope = match format {
            Format::Mpack => Envelope::from_mpack(&item.data),
            Format::Json => Envelope::from_json(&String::from_utf8_lossy(&item.data)),
        };

        let mut reply = self.processor.process(cid, envelope)?;
        reply.format = format;
        let bytes = reply.encode();

        let frame = match format {
            Format::Mpack => Frame::binary(true, bytes),
            Format::Json => Frame::text(true, bytes),
        };
        Some(frame::encode(frame, false))
    }
}

/// A WebSocket server specialized to the structured-message layer.
pub type MessageServer<P> = crate::ws_server::WsServer<MessageHandler<P>>;
