//! Length-prefixed frames
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | payload: bincode, len B   |
//! +----------------+---------------------------+
//! ```
//!
//! A clean end of stream is only accepted on a frame boundary.

use crate::error::CodecError;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tso_core::{RequestEnvelope, ResponseEnvelope};

/// Size of the length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Default upper bound of a frame payload (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Serialize `message` into a complete frame
pub fn encode_frame<T: Serialize>(message: &T, max_frame_size: usize) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > max_frame_size || payload.len() > u32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            len: payload.len(),
            max: max_frame_size,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    WriteBytesExt::write_u32::<BigEndian>(&mut frame, payload.len() as u32)?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Deserialize a frame payload (without its length prefix)
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::deserialize(payload)?)
}

/// Split one complete frame off the front of `buf`
///
/// Returns the payload and the number of bytes consumed, or `None` if `buf`
/// does not yet hold a whole frame.
pub fn split_frame(buf: &[u8], max_frame_size: usize) -> Result<Option<(&[u8], usize)>, CodecError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let len = BigEndian::read_u32(&buf[..LENGTH_PREFIX]) as usize;
    if len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }
    let end = LENGTH_PREFIX + len;
    if buf.len() < end {
        return Ok(None);
    }
    Ok(Some((&buf[LENGTH_PREFIX..end], end)))
}

/// Read one message from `reader`
///
/// Returns `Ok(None)` if the stream ended cleanly before a new frame.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    let mut read = 0;
    while read < LENGTH_PREFIX {
        let n = reader.read(&mut prefix[read..]).await?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(CodecError::Truncated {
                read,
                expected: LENGTH_PREFIX,
            });
        }
        read += n;
    }

    let len = BigEndian::read_u32(&prefix) as usize;
    if len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(CodecError::Truncated {
                read: filled,
                expected: len,
            });
        }
        filled += n;
    }

    decode_payload(&payload).map(Some)
}

/// Write one message to `writer` and flush it
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_frame_size: usize) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a request envelope into a frame
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_frame(envelope, DEFAULT_MAX_FRAME_SIZE)
}

/// Encode a response envelope into a frame
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_frame(envelope, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a complete request frame
pub fn decode_request(frame: &[u8]) -> Result<RequestEnvelope, CodecError> {
    decode_whole(frame)
}

/// Decode a complete response frame
pub fn decode_response(frame: &[u8]) -> Result<ResponseEnvelope, CodecError> {
    decode_whole(frame)
}

fn decode_whole<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    match split_frame(frame, DEFAULT_MAX_FRAME_SIZE)? {
        Some((payload, consumed)) if consumed == frame.len() => decode_payload(payload),
        Some((_, consumed)) => Err(CodecError::Malformed(format!(
            "{} trailing bytes after frame",
            frame.len() - consumed
        ))),
        None => Err(CodecError::Truncated {
            read: frame.len(),
            expected: frame
                .get(..LENGTH_PREFIX)
                .map(|p| LENGTH_PREFIX + BigEndian::read_u32(p) as usize)
                .unwrap_or(LENGTH_PREFIX),
        }),
    }
}
