//! Wire protocol for the chat relay.
//!
//! Frames are ASCII text terminated by `~`, with a suffix tag naming the
//! frame kind. See [`codec`] for the wire format and [`validation`] for the
//! input rules that keep payloads delimiter-free.

pub mod codec;
pub mod constants;
pub mod error;
pub mod frame;
pub mod validation;

// Re-export primary types for convenience.
pub use codec::{FrameCodec, decode, encode, encode_frame};
pub use error::{ProtocolError, ValidationError};
pub use frame::{Frame, FrameKind};
