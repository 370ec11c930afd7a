use std::time::Duration;

/// Topic used for socket-level heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Default prefix for upload channel topics; the auth token is appended.
pub const DEFAULT_TOPIC_PREFIX: &str = "upload:";

/// Serializer version announced in the socket URL (`vsn` query parameter).
pub const SOCKET_VSN: &str = "2.0.0";

/// How often a heartbeat is pushed on the `phoenix` topic.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time allowed for the server to reply to `phx_join`.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Read deadline: if nothing at all arrives within this window (no
/// heartbeat reply, no push), the socket is considered dead.
///
/// Must be comfortably larger than [`HEARTBEAT_INTERVAL`], since heartbeat
/// replies are the only traffic on an idle channel.
pub const READ_DEADLINE: Duration = Duration::from_secs(75);

/// Maximum accepted frame size in bytes (1 MB). Signaling frames are tiny;
/// anything bigger is dropped.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Push event carrying the upload session id.
pub const EVENT_INITIATE: &str = "initiate";

/// Push event sent once server-side processing finished.
pub const EVENT_COMPLETED: &str = "completed";

/// Push event carrying a human-readable failure.
pub const EVENT_ERROR: &str = "error";

/// Channel control events defined by the Phoenix protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    Join,
    Leave,
    Reply,
    Error,
    Close,
    Heartbeat,
}

impl ControlEvent {
    /// Returns the wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "phx_join",
            Self::Leave => "phx_leave",
            Self::Reply => "phx_reply",
            Self::Error => "phx_error",
            Self::Close => "phx_close",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Parses a wire event name. Returns `None` for application events.
    pub fn parse(event: &str) -> Option<Self> {
        match event {
            "phx_join" => Some(Self::Join),
            "phx_leave" => Some(Self::Leave),
            "phx_reply" => Some(Self::Reply),
            "phx_error" => Some(Self::Error),
            "phx_close" => Some(Self::Close),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}
