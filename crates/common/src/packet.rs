//! Outbound messages, codecs and buffer packing.
//!
//! Packed layout: `route: i32 BE | seq: i32 BE | payload`.

use crate::buffer::{BufferPool, PackedBuffer};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes};
use std::sync::Arc;

const HEADER_LEN: usize = 8;

/// Message body, either already encoded or to be marshaled by a [`Codec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Bytes),
    Value(serde_json::Value),
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Value(value)
    }
}

/// A message addressed to a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub seq: i32,
    pub route: i32,
    pub data: Payload,
}

impl Message {
    pub fn new(route: i32, data: impl Into<Payload>) -> Self {
        Self {
            seq: 0,
            route,
            data: data.into(),
        }
    }

    pub fn with_seq(mut self, seq: i32) -> Self {
        self.seq = seq;
        self
    }
}

/// Structured payload serializer.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn marshal(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn unmarshal(&self, data: &[u8]) -> Result<serde_json::Value>;
}

/// [`Codec`] backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn marshal(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Payload encryption applied after marshaling.
pub trait Encryptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Encode a message body: marshal structured values, then encrypt if configured.
pub fn encode_payload(
    payload: &Payload,
    codec: &dyn Codec,
    encryptor: Option<&dyn Encryptor>,
) -> Result<Bytes> {
    let plain = match payload {
        Payload::Raw(bytes) => bytes.clone(),
        Payload::Value(value) => Bytes::from(codec.marshal(value)?),
    };

    match encryptor {
        Some(encryptor) => Ok(Bytes::from(encryptor.encrypt(&plain)?)),
        None => Ok(plain),
    }
}

/// Pack an encoded message into a pooled buffer.
pub fn pack(pool: &Arc<BufferPool>, seq: i32, route: i32, payload: &[u8]) -> PackedBuffer {
    let mut buf = pool.get();
    let writer = buf.writer();
    writer.reserve(HEADER_LEN + payload.len());
    writer.put_i32(route);
    writer.put_i32(seq);
    writer.put_slice(payload);
    buf
}

/// Split a packed message into `(route, seq, payload)`.
pub fn unpack(mut data: &[u8]) -> Result<(i32, i32, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(Error::InvalidPacket(format!(
            "{} bytes is shorter than the header",
            data.len()
        )));
    }
    let route = data.get_i32();
    let seq = data.get_i32();
    Ok((route, seq, data))
}
