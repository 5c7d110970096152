//! Wire formats and framing for tunnel channels.
//!
//! Channels that delimit messages themselves (WebSocket) carry bare CBOR or
//! JSON payloads; the IPC channel runs over a raw byte stream and uses
//! length-prefixed frames: `[4-byte big-endian length][CBOR payload]`.

use crate::error::{TunnelError, TunnelResult};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Payload encoding carried by a channel.
///
/// `Binary` is CBOR, `Text` is JSON. Both sides of a channel must agree;
/// the server rejects frames that do not match its configured format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    Binary,
    Text,
}

/// Encode a serializable value as a bare CBOR payload.
pub fn cbor_encode<T: Serialize>(value: &T) -> TunnelResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

/// Decode a bare CBOR payload into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> TunnelResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: Serialize>(value: &T) -> TunnelResult<Vec<u8>> {
    let payload = cbor_encode(value)?;
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode one complete length-prefixed frame.
///
/// Fails if the buffer is short or carries trailing bytes; streaming
/// callers should use [`FrameDecoder`] instead.
pub fn frame_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> TunnelResult<T> {
    if data.len() < 4 {
        return Err(TunnelError::Codec("truncated frame header".into()));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() != 4 + len {
        return Err(TunnelError::Codec(format!(
            "frame length mismatch: header says {len}, got {}",
            data.len() - 4
        )));
    }
    cbor_decode(&data[4..])
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete decoded messages.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> TunnelResult<Vec<T>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();

        loop {
            if self.buffer.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if self.buffer.len() < 4 + len {
                break;
            }

            let msg: T = cbor_decode(&self.buffer[4..4 + len])?;
            messages.push(msg);
            self.buffer.drain(..4 + len);
        }

        Ok(messages)
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ConnectionRequest, TunnelRequest};

    fn sample() -> TunnelRequest {
        TunnelRequest::Read(ConnectionRequest { sid: 17, cid: 99 })
    }

    #[test]
    fn round_trip_single() {
        let msg = sample();
        let frame = frame_encode(&msg).unwrap();
        let decoded: TunnelRequest = frame_decode(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_multiple() {
        let msgs = vec![
            TunnelRequest::Version,
            sample(),
            TunnelRequest::Disconnect(ConnectionRequest { sid: 1, cid: 2 }),
        ];

        let mut combined = Vec::new();
        for m in &msgs {
            combined.extend(frame_encode(m).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let decoded: Vec<TunnelRequest> = decoder.feed(&combined).unwrap();
        assert_eq!(decoded, msgs);
    }

    #[test]
    fn incremental_feed() {
        let msg = sample();
        let frame = frame_encode(&msg).unwrap();
        let mut decoder = FrameDecoder::new();

        // Feed one byte at a time; nothing completes until the last byte.
        for i in 0..frame.len() - 1 {
            let decoded: Vec<TunnelRequest> = decoder.feed(&frame[i..i + 1]).unwrap();
            assert!(decoded.is_empty());
        }
        let decoded: Vec<TunnelRequest> = decoder.feed(&frame[frame.len() - 1..]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], msg);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut frame = frame_encode(&sample()).unwrap();
        frame.push(0);
        assert!(frame_decode::<TunnelRequest>(&frame).is_err());
    }
}
