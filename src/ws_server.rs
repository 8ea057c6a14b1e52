//! The WebSocket server layer (§4.6): a [`crate::server::Codec`] that
//! takes a connection from `HTTP_WAIT` through the upgrade handshake into
//! `WS_OPEN`, then decodes frames and reassembles messages, handing
//! complete `Message`s to the worker pool while answering
//! PING/CLOSE/non-upgrade-HTTP directly (bypassing the queue via
//! `drain_immediate`). Grounded on the teacher crate's HTTP-then-frames
//! split (former `handshake::accept_async_with_config` /
//! `request.rs`), generalized to run per work-item rather than owning
//! the whole socket.

use crate::buffer::Buffer;
use crate::config::WebSocketConfig;
use crate::error::{Error, Result};
use crate::frame::{self, Decoded, Frame, OpCode};
use crate::handshake;
use crate::message::{Message, Outcome, Reassembler};
use crate::server::Codec;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HttpWait,
    Open,
    Closed,
}

/// Callback for a non-upgrade HTTP request landing on a WebSocket
/// listener (§4.3): receives the raw request bytes, returns the raw
/// response bytes to write back verbatim.
pub type HttpCallback = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

pub struct WsCodec {
    ingress: Buffer,
    phase: Phase,
    reassembler: Reassembler,
    immediate: Vec<u8>,
    process_http: Option<HttpCallback>,
}

impl WsCodec {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            ingress: Buffer::new(),
            phase: Phase::HttpWait,
            reassembler: Reassembler::new(config.max_message_size),
            immediate: Vec::new(),
            process_http: None,
        }
    }

    pub fn with_http_callback(mut self, callback: HttpCallback) -> Self {
        self.process_http = Some(callback);
        self
    }

    fn handle_upgrade_phase(&mut self) -> Result<()> {
        match handshake::parse_upgrade_request(self.ingress.as_slice()) {
            Ok(Some((req, consumed))) => {
                self.immediate.extend(
                    handshake::build_switching_protocols_response(&req.sec_websocket_key)
                        .into_bytes(),
                );
                self.ingress.drain(consumed);
                self.phase = Phase::Open;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(upgrade_err) => {
                if let Some(consumed) = complete_http_request_len(self.ingress.as_slice()) {
                    let raw = self.ingress.as_slice()[..consumed].to_vec();
                    self.ingress.drain(consumed);
                    if let Some(callback) = &self.process_http {
                        self.immediate.extend(callback(&raw));
                        self.phase = Phase::Closed;
                        return Ok(());
                    }
                }
                self.immediate.extend(handshake::build_bad_request().as_bytes());
                self.phase = Phase::Closed;
                Err(upgrade_err)
            }
        }
    }

    fn decode_frames(&mut self, out: &mut Vec<Message>) -> Result<()> {
        loop {
            match frame::decode(self.ingress.as_slice(), true)? {
                Decoded::Frame(frame, consumed) => {
                    self.ingress.drain(consumed);
                    match self.reassembler.accept(frame)? {
                        Outcome::Message(msg) => out.push(msg),
                        Outcome::Pending => {}
                        Outcome::Control(frame) => self.handle_control(frame),
                    }
                    if self.phase == Phase::Closed {
                        return Ok(());
                    }
                }
                Decoded::NeedMore(_) => return Ok(()),
            }
        }
    }

    fn handle_control(&mut self, frame: Frame) {
        match frame.opcode {
            OpCode::Ping => {
                self.immediate
                    .extend(frame::encode(Frame::pong(frame.payload), false));
            }
            OpCode::Pong => {}
            OpCode::Close => {
                let reply = frame::close_reply(&frame.payload);
                self.immediate.extend(frame::encode(reply, false));
                self.phase = Phase::Closed;
            }
            OpCode::Text | OpCode::Binary | OpCode::Continue => {
                unreachable!("only control opcodes reach handle_control")
            }
        }
    }
}

impl Codec for WsCodec {
    type Item = Message;

    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.ingress.append(bytes);
        let mut out = Vec::new();

        if self.phase == Phase::HttpWait {
            self.handle_upgrade_phase()?;
        }

        if self.phase == Phase::Open {
            self.decode_frames(&mut out)?;
        }

        Ok(out)
    }

    fn buffered_len(&self) -> usize {
        self.ingress.len()
    }

    fn on_close(&mut self) -> Option<Vec<u8>> {
        if self.phase == Phase::Open {
            self.phase = Phase::Closed;
            Some(frame::encode(Frame::close(Some(1001), "going away"), false))
        } else {
            None
        }
    }

    fn drain_immediate(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.immediate)
    }

    fn error_close(&mut self, err: &Error) -> Option<Vec<u8>> {
        if self.phase == Phase::Open && err.is_protocol_error() {
            self.phase = Phase::Closed;
            Some(frame::encode(Frame::close(Some(1002), ""), false))
        } else {
            None
        }
    }
}

fn complete_http_request_len(buf: &[u8]) -> Option<usize> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => Some(n),
        _ => None,
    }
}

/// A WebSocket server: a `TcpServer` specialized to `WsCodec`, generic
/// over whatever `Handler<Message>` the caller supplies.
pub type WsServer<H> = crate::server::TcpServer<WsCodec, H>;

/// Encodes a `Message` back into a server-side (unmasked) frame, for
/// handlers that want to send a reply of the same kind they received.
pub fn encode_message(msg: Message) -> Vec<u8> {
    use crate::message::MessageKind;
    let frame = match msg.kind {
        MessageKind::Text => Frame::text(true, msg.data),
        MessageKind::Binary => Frame::binary(true, msg.data),
    };
    frame::encode(frame, false)
}
