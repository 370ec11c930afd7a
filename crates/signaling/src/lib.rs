//! Signaling channel for upload sessions.
//!
//! [`SignalingConnector`] and [`SignalingChannel`] are the contract the
//! upload coordinator consumes. [`WsConnector`] implements it over a
//! Phoenix-style WebSocket with heartbeats, a read deadline and automatic
//! rejoin after transport loss.

pub mod channel;
mod pumps {
    pub(crate) mod heartbeat;
    pub(crate) mod read;
    pub(crate) mod write;
}
mod reconnection;
pub mod types;
pub mod ws_channel;

pub use channel::{BoxFuture, SignalingChannel, SignalingConnector};
pub use types::{ChannelState, ReconnectConfig, SignalingError};
pub use ws_channel::{WsChannel, WsConnector};
