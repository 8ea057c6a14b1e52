//! A single-threaded, blocking-per-call WebSocket client connection
//! (§4.2): connect via the HTTP upgrade handshake, send/recv frames,
//! reassemble messages, answer PING/CLOSE automatically. Not safe for
//! concurrent use from multiple tasks, mirroring the teacher crate's
//! `WSConnection` (see former `connection.rs`) but replacing its
//! `Stream`-based polling with a plain async `recv_msg`, and replacing
//! its ad hoc `FragmentedMessage` with `message::Reassembler`.

use crate::buffer::Buffer;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::frame::{self, Decoded, Frame, OpCode};
use crate::handshake;
use crate::message::{Message, Outcome, Reassembler};
use crate::stream::{self, Socket};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

pub struct WebSocketClient {
    socket: Option<Socket>,
    ingress: Buffer,
    state: State,
    reassembler: Reassembler,
    config: ClientConfig,
    last_error: Option<String>,
}

impl WebSocketClient {
    pub fn new(config: ClientConfig) -> Self {
        let max_message_size = config.web_socket_config.max_message_size;
        Self {
            socket: None,
            ingress: Buffer::new(),
            state: State::Disconnected,
            reassembler: Reassembler::new(max_message_size),
            config,
            last_error: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The most recent error this connection produced (§7: per-connection
    /// last-error record rather than a process-wide global).
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(err.to_string());
        err
    }

    /// Parses `uri` (`ws[s]://host[:port][/path]`), connects, performs
    /// TLS if `wss`, then the HTTP/1.1 upgrade handshake (§4.2). On
    /// success the connection is `Open`.
    pub async fn connect(&mut self, uri: &str) -> Result<()> {
        self.state = State::Connecting;
        let url = Url::parse(uri).map_err(|e| self.fail(Error::from(e)))?;

        let use_tls = match url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(self.fail(Error::InvalidSchemeURL)),
        };
        let host = url.host_str().ok_or(Error::URLNoHost).map_err(|e| self.fail(e))?.to_string();
        let port = url.port().unwrap_or(if use_tls { 443 } else { 80 });
        let path = {
            let mut p = url.path().to_string();
            if p.is_empty() {
                p.push('/');
            }
            if let Some(q) = url.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        };

        let tcp = stream::connect_tcp((host.as_str(), port), self.config.connect_timeout)
            .await
            .map_err(|e| self.fail(e))?;

        let mut socket = if use_tls {
            stream::connect_tls(tcp, &host).await.map_err(|e| self.fail(e))?
        } else {
            Socket::Plain(tcp)
        };

        self.state = State::Handshaking;
        let host_header = if (use_tls && port == 443) || (!use_tls && port == 80) {
            host.clone()
        } else {
            format!("{host}:{port}")
        };
        let key = handshake::generate_key();
        let request = handshake::build_upgrade_request(&host_header, &path, &key);

        socket
            .write_all(request.as_bytes())
            .await
            .map_err(|e| self.fail(Error::from(e)))?;

        let (status, accept) = read_handshake_response(&mut socket, self.config.io_timeout)
            .await
            .map_err(|e| self.fail(e))?;
        handshake::validate_accept_response(status, accept.as_deref(), &key)
            .map_err(|e| self.fail(e))?;

        self.socket = Some(socket);
        self.state = State::Open;
        Ok(())
    }

    fn require_open(&self) -> Result<()> {
        match self.state {
            State::Open | State::Closing => Ok(()),
            _ => Err(Error::InvalidState),
        }
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.require_open()?;
        let socket = self.socket.as_mut().ok_or(Error::InvalidState)?;
        let bytes = frame::encode(frame, true);
        socket.write_all(&bytes).await.map_err(Error::from)?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_frame(Frame::text(true, text.as_bytes().to_vec())).await
    }

    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send_frame(Frame::binary(true, data.to_vec())).await
    }

    /// Pulls one frame from the ingress buffer, reading more bytes as
    /// needed, up to the configured I/O timeout. Returns `None` on
    /// timeout.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        self.require_open()?;
        loop {
            match frame::decode(self.ingress.as_slice(), false)? {
                Decoded::Frame(frame, consumed) => {
                    self.ingress.drain(consumed);
                    return Ok(Some(frame));
                }
                Decoded::NeedMore(_) => {
                    let socket = self.socket.as_mut().ok_or(Error::InvalidState)?;
                    let mut chunk = [0u8; 4096];
                    let read = timeout(self.config.io_timeout, socket.read(&mut chunk)).await;
                    match read {
                        Ok(Ok(0)) => {
                            self.state = State::Closed;
                            return Ok(None);
                        }
                        Ok(Ok(n)) => self.ingress.append(&chunk[..n]),
                        Ok(Err(e)) => return Err(Error::from(e)),
                        Err(_) => return Ok(None),
                    }
                }
            }
        }
    }

    /// Reassembles the next complete message, transparently answering
    /// PING with PONG and completing the close handshake on CLOSE (§4.2).
    /// A protocol error (bad fragmentation, oversize message, reserved
    /// bits, ...) closes the connection with CLOSE(1002) rather than
    /// propagating, per §4.2's reassembly-error clause.
    pub async fn recv_msg(&mut self) -> Result<Option<Message>> {
        loop {
            let frame = match self.recv_frame().await {
                Ok(Some(f)) => f,
                Ok(None) => return Ok(None),
                Err(e) if e.is_protocol_error() => return Ok(self.close_on_protocol_error(e).await),
                Err(e) => return Err(e),
            };

            let outcome = match self.reassembler.accept(frame) {
                Ok(outcome) => outcome,
                Err(e) if e.is_protocol_error() => return Ok(self.close_on_protocol_error(e).await),
                Err(e) => return Err(e),
            };

            match outcome {
                Outcome::Message(msg) => return Ok(Some(msg)),
                Outcome::Pending => continue,
                Outcome::Control(frame) => match frame.opcode {
                    OpCode::Ping => {
                        self.send_frame(Frame::pong(frame.payload)).await?;
                    }
                    OpCode::Pong => {}
                    OpCode::Close => {
                        let reply = frame::close_reply(&frame.payload);
                        let _ = self.send_frame(reply).await;
                        self.state = State::Closed;
                        self.socket = None;
                        return Ok(None);
                    }
                    _ => unreachable!("only control opcodes reach here"),
                },
            }
        }
    }

    async fn close_on_protocol_error(&mut self, err: Error) -> Option<Message> {
        self.last_error = Some(err.to_string());
        let _ = self.send_frame(Frame::close(Some(1002), "")).await;
        self.state = State::Closed;
        self.socket = None;
        None
    }

    /// Initiates the close handshake (§4.2): sends CLOSE(1000), waits up
    /// to the I/O timeout for the peer's CLOSE, then tears down the
    /// socket regardless of whether it arrived.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state != State::Open {
            self.state = State::Closed;
            self.socket = None;
            return Ok(());
        }
        self.state = State::Closing;
        self.send_frame(Frame::close(Some(1000), "")).await?;

        let deadline = self.config.io_timeout;
        let _ = timeout(deadline, async {
            loop {
                match self.recv_frame().await {
                    Ok(Some(f)) if f.opcode == OpCode::Close => break,
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        })
        .await;

        self.state = State::Closed;
        self.socket = None;
        Ok(())
    }
}

/// Reads and parses the HTTP/1.1 handshake response line-by-line until
/// the blank line terminating headers, returning the status code and
/// `Sec-WebSocket-Accept` value.
async fn read_handshake_response(
    socket: &mut Socket,
    io_timeout: Duration,
) -> Result<(u16, Option<String>)> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find_header_end(&raw) {
            raw.truncate(pos);
            break;
        }
        let n = timeout(io_timeout, socket.read(&mut chunk))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from)?;
        if n == 0 {
            return Err(Error::IncompleteHTTPRequest);
        }
        raw.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&raw);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status_code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or(Error::InvalidHTTPHandshake)?;

    let mut accept = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
                accept = Some(value.trim().to_string());
            }
        }
    }

    Ok((status_code, accept))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
