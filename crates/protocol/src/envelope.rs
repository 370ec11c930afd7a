use serde::{Deserialize, Serialize};

use crate::constants::{ControlEvent, PHOENIX_TOPIC};

/// A single frame on the signaling socket.
///
/// Serialized as a five-element JSON array. The `payload` field uses
/// `serde_json::value::RawValue` to defer deserialization until the event
/// name is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawFrame", into = "RawFrame")]
pub struct Frame {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Box<serde_json::value::RawValue>,
}

#[derive(Serialize, Deserialize)]
struct RawFrame(
    Option<String>,
    Option<String>,
    String,
    String,
    Box<serde_json::value::RawValue>,
);

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        Self {
            join_ref: raw.0,
            msg_ref: raw.1,
            topic: raw.2,
            event: raw.3,
            payload: raw.4,
        }
    }
}

impl From<Frame> for RawFrame {
    fn from(f: Frame) -> Self {
        RawFrame(f.join_ref, f.msg_ref, f.topic, f.event, f.payload)
    }
}

impl Frame {
    /// Creates a frame with the given payload.
    pub fn new<T: Serialize>(
        join_ref: Option<String>,
        msg_ref: Option<String>,
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(payload)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic: topic.into(),
            event: event.into(),
            payload: serde_json::value::RawValue::from_string(json)?,
        })
    }

    /// Builds a `phx_join` frame. Join frames carry the same value in
    /// `join_ref` and `ref`.
    pub fn join(topic: &str, join_ref: &str) -> Result<Self, serde_json::Error> {
        Self::new(
            Some(join_ref.to_string()),
            Some(join_ref.to_string()),
            topic,
            ControlEvent::Join.as_str(),
            &serde_json::json!({}),
        )
    }

    /// Builds a `phx_leave` frame for a joined topic.
    pub fn leave(topic: &str, join_ref: &str, msg_ref: &str) -> Result<Self, serde_json::Error> {
        Self::new(
            Some(join_ref.to_string()),
            Some(msg_ref.to_string()),
            topic,
            ControlEvent::Leave.as_str(),
            &serde_json::json!({}),
        )
    }

    /// Builds a socket heartbeat frame.
    pub fn heartbeat(msg_ref: &str) -> Result<Self, serde_json::Error> {
        Self::new(
            None,
            Some(msg_ref.to_string()),
            PHOENIX_TOPIC,
            ControlEvent::Heartbeat.as_str(),
            &serde_json::json!({}),
        )
    }

    /// Returns the control event, if this frame is one.
    pub fn control(&self) -> Option<ControlEvent> {
        ControlEvent::parse(&self.event)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }

    /// Encodes the frame as a JSON text message.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a frame from a JSON text message.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Outcome reported in a `phx_reply` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub status: ReplyStatus,
    #[serde(default)]
    pub response: serde_json::Value,
}

impl ReplyPayload {
    /// Extracts a human-readable reason from an error reply.
    ///
    /// Servers conventionally answer rejected joins with
    /// `{"reason": "..."}`; anything else is rendered as JSON.
    pub fn reason(&self) -> String {
        match self.response.get("reason").and_then(|r| r.as_str()) {
            Some(reason) => reason.to_string(),
            None => self.response.to_string(),
        }
    }
}
