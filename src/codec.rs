//! Wire framing for consumer writes (length + crc32c + CBOR body).

use std::convert::Infallible;

use bytes::Bytes;
use crc32c::crc32c;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::message::Metadata;

pub const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: max {max_frame_bytes} got {got_bytes}")]
    FrameTooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },
    #[error("frame length invalid: {reason}")]
    FrameLengthInvalid { reason: String },
    #[error("frame truncated: need {need} bytes, have {have}")]
    FrameTruncated { need: usize, have: usize },
    #[error("frame crc mismatch: expected {expected} got {got}")]
    FrameCrcMismatch { expected: u32, got: u32 },
    #[error("cbor encode error: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("cbor decode error: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("indefinite-length map not supported")]
    IndefiniteLength,
    #[error("message body missing field {field}")]
    MissingField { field: &'static str },
}

/// Reusable frame encoder.
///
/// Only the scan worker encodes, so the encoder owns its buffers and
/// needs no lock. The body is a CBOR map `{shard, id, value}`; the frame
/// prepends a little-endian length and crc32c of the body.
pub struct FrameEncoder {
    frame: Vec<u8>,
    body: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameEncoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            frame: Vec::new(),
            body: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Encodes one message into the internal buffer. The returned slice
    /// is valid until the next call.
    pub fn encode(&mut self, meta: Metadata, payload: &[u8]) -> Result<&[u8], FrameError> {
        self.body.clear();
        let mut enc = Encoder::new(&mut self.body);
        enc.map(3)?;
        enc.str("shard")?;
        enc.u64(meta.shard)?;
        enc.str("id")?;
        enc.u64(meta.id)?;
        enc.str("value")?;
        enc.bytes(payload)?;

        if self.body.len() > self.max_frame_bytes {
            return Err(FrameError::FrameTooLarge {
                max_frame_bytes: self.max_frame_bytes,
                got_bytes: self.body.len(),
            });
        }
        let length = u32::try_from(self.body.len()).map_err(|_| FrameError::FrameLengthInvalid {
            reason: "frame length exceeds u32".to_string(),
        })?;
        let crc = crc32c(&self.body);

        self.frame.clear();
        self.frame.reserve(FRAME_HEADER_LEN + self.body.len());
        self.frame.extend_from_slice(&length.to_le_bytes());
        self.frame.extend_from_slice(&crc.to_le_bytes());
        self.frame.extend_from_slice(&self.body);
        Ok(&self.frame)
    }
}

/// Validates one complete frame and returns its body.
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(FrameError::FrameTruncated {
            need: FRAME_HEADER_LEN,
            have: frame.len(),
        });
    }
    let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if length == 0 {
        return Err(FrameError::FrameLengthInvalid {
            reason: "frame length cannot be zero".to_string(),
        });
    }
    let need = FRAME_HEADER_LEN + length;
    if frame.len() != need {
        return Err(FrameError::FrameTruncated {
            need,
            have: frame.len(),
        });
    }
    let expected_crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let body = &frame[FRAME_HEADER_LEN..];
    let actual_crc = crc32c(body);
    if actual_crc != expected_crc {
        return Err(FrameError::FrameCrcMismatch {
            expected: expected_crc,
            got: actual_crc,
        });
    }
    Ok(body)
}

/// Decodes a complete frame back into metadata and payload. Used by the
/// ack-ingress demultiplexer and by tests asserting wire contents.
pub fn decode_message(frame: &[u8]) -> Result<(Metadata, Bytes), FrameError> {
    let body = decode_frame(frame)?;
    let mut dec = Decoder::new(body);
    let map_len = dec.map()?.ok_or(FrameError::IndefiniteLength)?;

    let mut shard = None;
    let mut id = None;
    let mut value = None;
    for _ in 0..map_len {
        match dec.str()? {
            "shard" => shard = Some(dec.u64()?),
            "id" => id = Some(dec.u64()?),
            "value" => value = Some(Bytes::copy_from_slice(dec.bytes()?)),
            _ => dec.skip()?,
        }
    }

    let meta = Metadata {
        shard: shard.ok_or(FrameError::MissingField { field: "shard" })?,
        id: id.ok_or(FrameError::MissingField { field: "id" })?,
    };
    let value = value.ok_or(FrameError::MissingField { field: "value" })?;
    Ok((meta, value))
}
