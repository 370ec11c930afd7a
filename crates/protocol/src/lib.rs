//! Wire types for the upload signaling channel.
//!
//! Frames follow the Phoenix channels v2 JSON serializer:
//! `[join_ref, ref, topic, event, payload]`.

pub mod constants;
pub mod envelope;
pub mod events;

// Re-export primary types for convenience.
pub use constants::ControlEvent;
pub use envelope::{Frame, ReplyPayload, ReplyStatus};
pub use events::{ChannelEvent, CompletedPayload, ErrorPayload, InitiatePayload};
