//! RFC 6455 §5.2 frame layout: encode/decode of a single WebSocket frame,
//! including masking. Decoding is streaming over whatever bytes have
//! accumulated in a connection's ingress buffer so far, mirroring the
//! byte-by-byte `read_frame` the teacher crate used to do directly against
//! a socket (see `handshake`/former `read.rs`) but operating purely on an
//! in-memory slice so it can be driven by either a blocking client socket
//! or the server's non-blocking event loop.

use crate::error::{Error, Result};
use rand::RngCore;

pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask: [u8; 4],
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            mask: [0; 4],
            payload,
        }
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn text(fin: bool, payload: Vec<u8>) -> Self {
        Self::new(fin, OpCode::Text, payload)
    }

    pub fn binary(fin: bool, payload: Vec<u8>) -> Self {
        Self::new(fin, OpCode::Binary, payload)
    }

    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        Self::new(true, OpCode::Close, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// Extracts the status code carried by a CLOSE frame's payload, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

/// Generates a fresh 32-bit mask for an outgoing client frame. Not
/// cryptographically sensitive (RFC 6455 only requires it be hard to
/// predict from network traffic), so `rand`'s default thread-local RNG is
/// sufficient.
pub fn generate_mask() -> [u8; 4] {
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    mask
}

fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encodes `frame` to its wire representation. `is_client` controls mask
/// direction: clients MUST mask (a fresh mask is generated here,
/// overwriting whatever was in `frame.mask`), servers MUST NOT.
pub fn encode(mut frame: Frame, is_client: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.payload.len() + 14);

    let first_byte = (frame.fin as u8) << 7
        | (frame.rsv1 as u8) << 6
        | (frame.rsv2 as u8) << 5
        | (frame.rsv3 as u8) << 4
        | frame.opcode.as_u8();
    out.push(first_byte);

    let mask = if is_client {
        let mask = generate_mask();
        frame.mask = mask;
        frame.masked = true;
        mask
    } else {
        frame.masked = false;
        [0u8; 4]
    };

    let mask_bit: u8 = if frame.masked { 0x80 } else { 0x00 };
    let len = frame.payload.len();

    if len <= 125 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if frame.masked {
        out.extend_from_slice(&mask);
        let mut payload = frame.payload;
        apply_mask(&mut payload, mask);
        out.extend_from_slice(&payload);
    } else {
        out.extend_from_slice(&frame.payload);
    }

    out
}

/// Result of attempting to decode one frame from the front of a buffer.
pub enum Decoded {
    /// Not enough bytes yet; caller should wait for more I/O. The `usize`
    /// is a best-effort estimate of how many additional bytes are needed,
    /// used only to size the next read — callers must not rely on it
    /// being exact.
    NeedMore(usize),
    /// A full frame was parsed. `usize` is the number of bytes consumed
    /// from the front of the input and must be drained by the caller.
    Frame(Frame, usize),
}

/// Streaming decode. `is_server` selects which masking direction is
/// required: servers MUST reject unmasked client frames, clients MUST
/// reject masked server frames.
pub fn decode(buf: &[u8], is_server: bool) -> Result<Decoded> {
    if buf.len() < 2 {
        return Ok(Decoded::NeedMore(2 - buf.len()));
    }

    let b0 = buf[0];
    let b1 = buf[1];

    let fin = b0 & 0x80 != 0;
    let rsv1 = b0 & 0x40 != 0;
    let rsv2 = b0 & 0x20 != 0;
    let rsv3 = b0 & 0x10 != 0;
    if rsv1 || rsv2 || rsv3 {
        return Err(Error::RSVNotZero);
    }

    let opcode = OpCode::from_byte(b0 & 0x0F)?;

    let masked = b1 & 0x80 != 0;
    if is_server && !masked {
        return Err(Error::UnmaskedFromClient);
    }
    if !is_server && masked {
        return Err(Error::MaskedFromServer);
    }

    let len_code = b1 & 0x7F;
    if opcode.is_control() && (!fin || len_code > MAX_CONTROL_PAYLOAD as u8) {
        return Err(Error::ControlFramesFragmented);
    }

    let mut pos = 2usize;
    let payload_len: u64 = match len_code {
        126 => {
            if buf.len() < pos + 2 {
                return Ok(Decoded::NeedMore(pos + 2 - buf.len()));
            }
            let v = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
            pos += 2;
            v
        }
        127 => {
            if buf.len() < pos + 8 {
                return Ok(Decoded::NeedMore(pos + 8 - buf.len()));
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[pos..pos + 8]);
            pos += 8;
            u64::from_be_bytes(bytes)
        }
        n => n as u64,
    };

    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(Error::ControlFramePayloadSize);
    }
    if payload_len > usize::MAX as u64 {
        return Err(Error::MaxFrameSize);
    }

    let mask = if masked {
        if buf.len() < pos + 4 {
            return Ok(Decoded::NeedMore(pos + 4 - buf.len()));
        }
        let mut m = [0u8; 4];
        m.copy_from_slice(&buf[pos..pos + 4]);
        pos += 4;
        Some(m)
    } else {
        None
    };

    let payload_len = payload_len as usize;
    if buf.len() < pos + payload_len {
        return Ok(Decoded::NeedMore(pos + payload_len - buf.len()));
    }

    let mut payload = buf[pos..pos + payload_len].to_vec();
    pos += payload_len;

    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    let frame = Frame {
        fin,
        rsv1: false,
        rsv2: false,
        rsv3: false,
        opcode,
        masked,
        mask: mask.unwrap_or([0; 4]),
        payload,
    };

    Ok(Decoded::Frame(frame, pos))
}

const KNOWN_CLOSE_CODES: &[u16] = &[1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011];

/// The CLOSE reply to send for an inbound CLOSE frame's `payload`: a
/// known code with a valid UTF-8 (or absent) reason is echoed verbatim;
/// anything else — unknown code, missing code, or a reason that isn't
/// valid UTF-8 — gets a generic protocol-error close (§9 close-status
/// echo policy).
pub fn close_reply(payload: &[u8]) -> Frame {
    if payload.len() < 2 {
        return Frame::close(Some(1002), "");
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !KNOWN_CLOSE_CODES.contains(&code) || std::str::from_utf8(&payload[2..]).is_err() {
        return Frame::close(Some(1002), "");
    }
    Frame::close(Some(code), "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for byte in [0x0, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let op = OpCode::from_byte(byte).unwrap();
            assert_eq!(op.as_u8(), byte);
        }
        assert!(OpCode::from_byte(0x3).is_err());
    }

    #[test]
    fn client_frame_roundtrip() {
        let frame = Frame::text(true, b"Hello, world!".to_vec());
        let wire = encode(frame, true);
        match decode(&wire, true).unwrap() {
            Decoded::Frame(decoded, consumed) => {
                assert_eq!(consumed, wire.len());
                assert!(decoded.masked);
                assert_eq!(decoded.payload, b"Hello, world!");
                assert_eq!(decoded.opcode, OpCode::Text);
                assert!(decoded.fin);
            }
            Decoded::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn server_frame_is_unmasked() {
        let frame = Frame::binary(true, vec![1, 2, 3, 4]);
        let wire = encode(frame, false);
        match decode(&wire, false).unwrap() {
            Decoded::Frame(decoded, _) => {
                assert!(!decoded.masked);
                assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
            }
            Decoded::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn rejects_unmasked_frame_at_server() {
        let frame = Frame::text(true, b"hi".to_vec());
        let wire = encode(frame, false); // encoded as if from a server: unmasked
        let err = match decode(&wire, true) {
            Err(e) => e,
            Ok(_) => panic!("expected UnmaskedFromClient"),
        };
        assert!(matches!(err, Error::UnmaskedFromClient));
    }

    #[test]
    fn rejects_masked_frame_at_client() {
        let frame = Frame::text(true, b"hi".to_vec());
        let wire = encode(frame, true); // encoded as if from a client: masked
        let err = match decode(&wire, false) {
            Err(e) => e,
            Ok(_) => panic!("expected MaskedFromServer"),
        };
        assert!(matches!(err, Error::MaskedFromServer));
    }

    #[test]
    fn needs_more_on_partial_header() {
        let wire = vec![0x81];
        assert!(matches!(decode(&wire, false).unwrap(), Decoded::NeedMore(_)));
    }

    #[test]
    fn needs_more_on_partial_payload() {
        let frame = Frame::binary(true, vec![0u8; 200]);
        let wire = encode(frame, false);
        let partial = &wire[..wire.len() - 10];
        assert!(matches!(decode(partial, false).unwrap(), Decoded::NeedMore(_)));
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let mut frame = Frame::ping(vec![1, 2, 3]);
        frame.fin = false;
        let wire = encode(frame, false);
        let err = decode(&wire, false).unwrap_err();
        assert!(matches!(err, Error::ControlFramesFragmented));
    }

    #[test]
    fn rejects_oversize_control_payload() {
        let frame = Frame::ping(vec![0u8; 200]);
        let wire = encode(frame, false);
        let err = decode(&wire, false).unwrap_err();
        assert!(matches!(err, Error::ControlFramePayloadSize));
    }

    #[test]
    fn large_payload_uses_64_bit_length() {
        let payload = vec![7u8; 70_000];
        let frame = Frame::binary(true, payload.clone());
        let wire = encode(frame, false);
        assert_eq!(wire[1], 127);
        match decode(&wire, false).unwrap() {
            Decoded::Frame(decoded, _) => assert_eq!(decoded.payload, payload),
            Decoded::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn close_reply_echoes_known_and_normalizes_unknown() {
        assert_eq!(close_reply(&Frame::close(Some(1001), "").payload).close_code(), Some(1001));
        assert_eq!(close_reply(&Frame::close(Some(4999), "").payload).close_code(), Some(1002));
        assert_eq!(close_reply(&[]).close_code(), Some(1002));
    }

    #[test]
    fn close_reply_rejects_non_utf8_reason() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(close_reply(&payload).close_code(), Some(1002));
    }
}
