//! STOMP codec for async I/O.
//!
//! `stomp` holds the pure frame encoder/decoder; `framed` drives it over an
//! async byte stream.

mod framed;
pub mod stomp;

pub use framed::StompCodec;
pub use stomp::{decode_frame, encode_frame};
