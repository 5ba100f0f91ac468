//! Codec errors

use std::io;
use thiserror::Error;

/// Errors raised while framing or decoding messages
///
/// Every variant leaves the stream at an unknown position, so the connection
/// carrying it must be torn down.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame length prefix exceeds the configured maximum
    #[error("frame of {len} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Announced or encoded length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Payload is not a valid message
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Stream ended inside a frame
    #[error("stream ended after {read} of {expected} bytes")]
    Truncated {
        /// Bytes received
        read: usize,
        /// Bytes announced
        expected: usize,
    },
}

// Payloads are (de)serialized in memory, so every bincode failure is a
// malformed message rather than a stream error.
impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Malformed(e.to_string())
    }
}
