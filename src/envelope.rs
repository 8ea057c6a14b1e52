//! The structured message container (§3, §4.4): a routing map, a headers
//! map, and a content blob, carried over the wire as either MessagePack
//! or JSON with a fixed top-level key order — "routing", "headers",
//! "content" — on encode. The container itself has no counterpart in the
//! teacher crate (socket-flow is a bare WebSocket transport); the codec
//! choice follows the rest of the retrieval pack instead: `rmp` gives the
//! low-level MessagePack family writers/readers the schema calls for, and
//! `serde_json` (with `preserve_order`, as the lamarrs example pack uses
//! it) gives the JSON side ordered-object output without hand-rolling a
//! string builder.

use crate::error::{Error, Result};
use crate::ordered_map::OrderedMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rmp::decode;
use rmp::encode;
use serde_json::{Map, Value};
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mpack,
    Json,
}

/// Bitset over {VALID, PRIORITY, OUT_OF_BAND} (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const VALID: u8 = 0b001;
    pub const PRIORITY: u8 = 0b010;
    pub const OUT_OF_BAND: u8 = 0b100;

    pub fn empty() -> Self {
        Flags(0)
    }

    pub fn valid() -> Self {
        Flags(Self::VALID)
    }

    pub fn is_set(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }
}

/// A structured message: routing/header maps plus binary content (§3).
/// Mutated only by its owner; on a failed decode `flags` has `VALID`
/// cleared but the struct is otherwise populated as far as parsing got,
/// so it remains safe to inspect or discard.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub routing: OrderedMap,
    pub headers: OrderedMap,
    pub content: Vec<u8>,
    pub flags: Flags,
    pub format: Format,
}

impl Envelope {
    pub fn new(content: Vec<u8>) -> Self {
        Envelope {
            routing: OrderedMap::new(),
            headers: OrderedMap::new(),
            content,
            flags: Flags::valid(),
            format: Format::Mpack,
        }
    }

    /// Encodes in whichever format this message last decoded as (or
    /// `Mpack` for a freshly constructed one), per §9's "format
    /// selection" note.
    pub fn encode(&self) -> Vec<u8> {
        match self.format {
            Format::Mpack => self.to_mpack(),
            Format::Json => self.to_json().into_bytes(),
        }
    }

    pub fn to_mpack(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode::write_map_len(&mut buf, 3).expect("writing to Vec<u8> is infallible");
        encode::write_str(&mut buf, "routing").expect("writing to Vec<u8> is infallible");
        write_string_map(&mut buf, &self.routing);
        encode::write_str(&mut buf, "headers").expect("writing to Vec<u8> is infallible");
        write_string_map(&mut buf, &self.headers);
        encode::write_str(&mut buf, "content").expect("writing to Vec<u8> is infallible");
        encode::write_bin(&mut buf, &self.content).expect("writing to Vec<u8> is infallible");
        buf
    }

    pub fn to_json(&self) -> String {
        let mut routing = Map::new();
        for (k, v) in self.routing.iter() {
            routing.insert(k.to_string(), Value::String(v.to_string()));
        }
        let mut headers = Map::new();
        for (k, v) in self.headers.iter() {
            headers.insert(k.to_string(), Value::String(v.to_string()));
        }
        let mut top = Map::new();
        top.insert("routing".to_string(), Value::Object(routing));
        top.insert("headers".to_string(), Value::Object(headers));
        top.insert("content".to_string(), Value::String(BASE64.encode(&self.content)));
        serde_json::to_string(&Value::Object(top)).expect("serializing to a String is infallible")
    }

    /// Decodes a MessagePack-encoded container (§4.4). Unlike a plain
    /// `Result`-returning parser, this always returns a usable
    /// `Envelope`: on failure `VALID` is cleared and the fields are left
    /// at their defaults, matching the "deserialize returns a boolean"
    /// contract from §7 expressed as a flag instead.
    pub fn from_mpack(bytes: &[u8]) -> Self {
        match try_decode_mpack(bytes) {
            Ok(env) => env,
            Err(_) => {
                let mut env = Envelope::new(Vec::new());
                env.format = Format::Mpack;
                env.flags.clear(Flags::VALID);
                env
            }
        }
    }

    pub fn from_json(text: &str) -> Self {
        match try_decode_json(text) {
            Ok(env) => env,
            Err(_) => {
                let mut env = Envelope::new(Vec::new());
                env.format = Format::Json;
                env.flags.clear(Flags::VALID);
                env
            }
        }
    }
}

fn write_string_map(buf: &mut Vec<u8>, map: &OrderedMap) {
    encode::write_map_len(buf, map.len() as u32).expect("writing to Vec<u8> is infallible");
    for (k, v) in map.iter() {
        encode::write_str(buf, k).expect("writing to Vec<u8> is infallible");
        encode::write_str(buf, v).expect("writing to Vec<u8> is infallible");
    }
}

fn decode_str(cursor: &mut &[u8]) -> Result<String> {
    let len = decode::read_str_len(cursor).map_err(|_| Error::Truncation)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| Error::Truncation)?;
    String::from_utf8(buf).map_err(Error::from)
}

fn decode_bin(cursor: &mut &[u8]) -> Result<Vec<u8>> {
    let len = decode::read_bin_len(cursor).map_err(|_| Error::Truncation)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| Error::Truncation)?;
    Ok(buf)
}

fn decode_string_map(cursor: &mut &[u8]) -> Result<OrderedMap> {
    let len = decode::read_map_len(cursor).map_err(|_| Error::Truncation)?;
    let mut map = OrderedMap::new();
    for _ in 0..len {
        let key = decode_str(cursor)?;
        let value = decode_str(cursor)?;
        map.set(key, value);
    }
    Ok(map)
}

fn try_decode_mpack(bytes: &[u8]) -> Result<Envelope> {
    let mut cursor: &[u8] = bytes;
    let top_len = decode::read_map_len(&mut cursor).map_err(|_| Error::Truncation)?;

    let mut routing = None;
    let mut headers = None;
    let mut content = None;

    for _ in 0..top_len {
        let key = decode_str(&mut cursor)?;
        match key.as_str() {
            "routing" => routing = Some(decode_string_map(&mut cursor)?),
            "headers" => headers = Some(decode_string_map(&mut cursor)?),
            "content" => content = Some(decode_bin(&mut cursor)?),
            other => return Err(Error::UnknownKey(other.to_string())),
        }
    }

    Ok(Envelope {
        routing: routing.ok_or(Error::Truncation)?,
        headers: headers.ok_or(Error::Truncation)?,
        content: content.ok_or(Error::Truncation)?,
        flags: Flags::valid(),
        format: Format::Mpack,
    })
}

fn string_map_from_json(value: &Value) -> Result<OrderedMap> {
    let obj = value.as_object().ok_or(Error::TypeMismatch("map"))?;
    let mut map = OrderedMap::new();
    for (k, v) in obj {
        let s = v.as_str().ok_or(Error::TypeMismatch("string"))?;
        map.set(k.clone(), s.to_string());
    }
    Ok(map)
}

fn try_decode_json(text: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(text).map_err(|_| Error::Truncation)?;
    let obj = value.as_object().ok_or(Error::TypeMismatch("object"))?;

    for key in obj.keys() {
        if !matches!(key.as_str(), "routing" | "headers" | "content") {
            return Err(Error::UnknownKey(key.clone()));
        }
    }

    let routing = obj
        .get("routing")
        .map(string_map_from_json)
        .transpose()?
        .ok_or(Error::Truncation)?;
    let headers = obj
        .get("headers")
        .map(string_map_from_json)
        .transpose()?
        .ok_or(Error::Truncation)?;
    let content_b64 = obj
        .get("content")
        .and_then(Value::as_str)
        .ok_or(Error::Truncation)?;
    let content = BASE64.decode(content_b64).map_err(|_| Error::Truncation)?;

    Ok(Envelope {
        routing,
        headers,
        content,
        flags: Flags::valid(),
        format: Format::Json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        let mut env = Envelope::new(b"content".to_vec());
        env.routing.set("to", "mike");
        env.headers.set("id", "test");
        env
    }

    #[test]
    fn mpack_round_trips() {
        let env = sample();
        let bytes = env.to_mpack();
        let decoded = Envelope::from_mpack(&bytes);
        assert!(decoded.flags.is_set(Flags::VALID));
        assert_eq!(decoded.routing.get("to"), Some("mike"));
        assert_eq!(decoded.headers.get("id"), Some("test"));
        assert_eq!(decoded.content, b"content");
    }

    #[test]
    fn json_round_trips_with_base64_content() {
        let env = sample();
        let text = env.to_json();
        assert!(text.contains("\"content\":\"Y29udGVudA==\""));
        let decoded = Envelope::from_json(&text);
        assert!(decoded.flags.is_set(Flags::VALID));
        assert_eq!(decoded.content, b"content");
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let decoded = Envelope::from_json(r#"{"routing":{},"headers":{},"content":"","bogus":1}"#);
        assert!(!decoded.flags.is_set(Flags::VALID));
    }

    #[test]
    fn truncated_mpack_clears_valid_flag() {
        let env = sample();
        let mut bytes = env.to_mpack();
        bytes.truncate(bytes.len() - 2);
        let decoded = Envelope::from_mpack(&bytes);
        assert!(!decoded.flags.is_set(Flags::VALID));
    }

    #[test]
    fn json_key_order_is_routing_headers_content() {
        let env = sample();
        let text = env.to_json();
        let routing_pos = text.find("\"routing\"").unwrap();
        let headers_pos = text.find("\"headers\"").unwrap();
        let content_pos = text.find("\"content\"").unwrap();
        assert!(routing_pos < headers_pos && headers_pos < content_pos);
    }
}
