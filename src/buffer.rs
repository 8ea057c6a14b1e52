//! Growable byte buffer used for per-connection ingress/egress staging.
//!
//! Mirrors the shape of `bytes::BytesMut` but keeps the drain/take
//! semantics spec'd for the wire-protocol layers explicit and easy to
//! reason about: `append` grows it, `drain` removes a consumed prefix
//! (used after a frame has been parsed out of the front of the buffer),
//! and `take` hands ownership of the whole contents to a caller that
//! wants to send it onward without a copy.

#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Removes the first `n` bytes. Panics if `n > self.len()`, same as
    /// `Vec::drain` would.
    pub fn drain(&mut self, n: usize) {
        self.data.drain(0..n);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Transfers ownership of the buffered bytes out, leaving this buffer
    /// empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
