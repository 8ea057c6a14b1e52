use thiserror::Error;

/// Error taxonomy for the whole crate, grouped the way the design's
/// error-handling section groups them: Protocol, Socket, Timeout, Codec,
/// State, Resource. Every fallible public call returns `Result<T, Error>`;
/// connections additionally keep the most recent `Error` they produced
/// (see `WebSocketClient::last_error` and the server's per-cid record)
/// rather than reaching for a process-wide global.
#[derive(Error, Debug)]
pub enum Error {
    // --- Protocol ---
    #[error("reserved bit set without a negotiated extension")]
    RSVNotZero,

    #[error("Invalid Opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, must not exceed 125 bytes")]
    ControlFramePayloadSize,

    #[error("server received an unmasked frame from a client")]
    UnmaskedFromClient,

    #[error("client received a masked frame from a server")]
    MaskedFromServer,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // --- Handshake / upgrade ---
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Sec-WebSocket-Version must be 13")]
    UnsupportedWebSocketVersion,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // --- URL / addressing ---
    #[error("{source}")]
    URLParseError {
        #[from]
        source: url::ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    #[error("use_tls = `{0}` argument does not match the passed URL scheme: `{1}`")]
    SchemeAgainstTlsConfig(bool, String),

    // --- Socket ---
    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("{source}")]
    IOError {
        #[from]
        source: std::io::Error,
    },

    // --- Timeout ---
    #[error("operation timed out")]
    Timeout,

    // --- Codec (structured message) ---
    #[error("truncated message payload")]
    Truncation,

    #[error("unexpected type for field `{0}`")]
    TypeMismatch(&'static str),

    #[error("unknown top-level key `{0}`")]
    UnknownKey(String),

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: std::string::FromUtf8Error,
    },

    // --- State ---
    #[error("operation invalid in current connection state")]
    InvalidState,

    // --- Resource ---
    #[error("request queue is full")]
    QueueFull,

    #[error("connection id `{0}` is no longer known to the server")]
    UnknownConnection(u64),

    #[error("channel communication error")]
    CommunicationError,
}

impl Error {
    /// Whether this error represents a WebSocket protocol violation that
    /// should be answered with CLOSE(1002) and a torn-down connection,
    /// rather than propagated to the caller (§4.2, §7 propagation policy).
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::RSVNotZero
                | Error::InvalidOpcode(_)
                | Error::ControlFramesFragmented
                | Error::ControlFramePayloadSize
                | Error::UnmaskedFromClient
                | Error::MaskedFromServer
                | Error::MaxFrameSize
                | Error::MaxMessageSize
                | Error::InvalidFrameFragmentation
                | Error::InvalidContinuationFrame
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(Error::RSVNotZero.to_string(), "reserved bit set without a negotiated extension");
        assert_eq!(Error::InvalidOpcode(0x3).to_string(), "Invalid Opcode: 0x3");
    }
}
