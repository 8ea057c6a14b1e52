//! The HTTP/1.1 → WebSocket upgrade handshake (RFC 6455 §4), both
//! directions. Client-side request construction mirrors the teacher
//! crate's key/accept computation in spirit; server-side parsing uses
//! `httparse`, replacing the teacher's hand-rolled line scan (`header_read`
//! / `parse_websocket_key` above) with the real parser so header folding
//! and ordering are handled correctly.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const WS_VERSION: &str = "13";

/// A fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Computes `Sec-WebSocket-Accept` for a given client key:
/// `base64(sha1(key ++ GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Builds the client's upgrade `GET` request. `host_header` is the
/// `Host:` value (host[:port] when port is non-default); `path` includes
/// the query string if any.
pub fn build_upgrade_request(host_header: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WS_VERSION}\r\n\
         \r\n"
    )
}

/// Validates a server's handshake response against the key we sent.
/// `status_code` and `headers` come from parsing the HTTP response (left
/// to the caller, since reading a response off a socket is transport-layer
/// work that belongs to `client.rs`).
pub fn validate_accept_response(
    status_code: u16,
    sec_websocket_accept: Option<&str>,
    our_key: &str,
) -> Result<()> {
    if status_code != 101 {
        return Err(Error::NoUpgrade);
    }
    let expected = accept_key(our_key);
    match sec_websocket_accept {
        Some(got) if got == expected => Ok(()),
        _ => Err(Error::InvalidAcceptKey),
    }
}

/// An incoming HTTP/1.1 upgrade request, parsed and validated per
/// spec §4.3.
#[derive(Debug)]
pub struct UpgradeRequest {
    pub path: String,
    pub sec_websocket_key: String,
}

/// Parses and validates the request line + headers from the front of
/// `buf`. Returns `Ok(None)` if the headers aren't fully buffered yet
/// (more I/O needed), `Ok(Some((req, consumed)))` on a valid upgrade, or
/// an `Err` describing why the request was rejected (caller replies
/// 400 and closes).
pub fn parse_upgrade_request(buf: &[u8]) -> Result<Option<(UpgradeRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    let status = req.parse(buf)?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    if req.method != Some("GET") {
        return Err(Error::InvalidHTTPHandshake);
    }
    match req.version {
        Some(v) if v >= 1 => {}
        _ => return Err(Error::InvalidHTTPHandshake),
    }

    let get_header = |name: &str| -> Option<String> {
        req.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| String::from_utf8_lossy(h.value).trim().to_string())
    };

    let upgrade = get_header("Upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.to_ascii_lowercase().contains("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    let connection = get_header("Connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    let version = get_header("Sec-WebSocket-Version").ok_or(Error::UnsupportedWebSocketVersion)?;
    if version != WS_VERSION {
        return Err(Error::UnsupportedWebSocketVersion);
    }

    let key = get_header("Sec-WebSocket-Key").ok_or(Error::NoSecWebsocketKey)?;
    let decoded = BASE64
        .decode(key.as_bytes())
        .map_err(|_| Error::NoSecWebsocketKey)?;
    if decoded.len() != 16 {
        return Err(Error::NoSecWebsocketKey);
    }

    let path = req.path.unwrap_or("/").to_string();

    Ok(Some((
        UpgradeRequest {
            path,
            sec_websocket_key: key,
        },
        consumed,
    )))
}

/// The `101 Switching Protocols` response for a validated upgrade.
pub fn build_switching_protocols_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}

/// The rejection response for a malformed/unsupported upgrade attempt.
pub fn build_bad_request() -> &'static str {
    "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
}
