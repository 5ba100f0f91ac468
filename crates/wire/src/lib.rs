//! Wire encoding for the timestamp oracle
//!
//! Requests and responses travel as length-prefixed bincode frames over a
//! byte stream. Responses carry the request identifier and may be written in
//! any order.
//!
//! ## Examples
//!
//! ```
//! use tso_core::{Request, RequestEnvelope, RequestId};
//! use tso_wire::{decode_request, encode_request};
//!
//! let envelope = RequestEnvelope::new(RequestId::new(1), Request::Timestamp);
//! let frame = encode_request(&envelope).unwrap();
//! assert_eq!(decode_request(&frame).unwrap(), envelope);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;

pub use error::CodecError;
pub use frame::{
    decode_payload, decode_request, decode_response, encode_frame, encode_request,
    encode_response, read_frame, split_frame, write_frame, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX,
};
