//! Application events pushed on an upload channel.

use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_COMPLETED, EVENT_ERROR, EVENT_INITIATE};
use crate::envelope::Frame;

/// Payload of the `initiate` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePayload {
    pub upload_id: String,
}

/// Payload of the `completed` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPayload {
    pub embed: String,
}

/// Payload of the `error` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// A decoded upload channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server opened an upload session.
    Initiate { session_id: String },
    /// Server-side processing of the uploaded media finished.
    Completed { artifact_ref: String },
    /// The server reported a failure.
    Error { message: String },
}

impl ChannelEvent {
    /// Decodes an application event from a frame.
    ///
    /// Returns `Ok(None)` for events this client does not handle.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, serde_json::Error> {
        let event = match frame.event.as_str() {
            EVENT_INITIATE => {
                let p: InitiatePayload = frame.parse_payload()?;
                Self::Initiate {
                    session_id: p.upload_id,
                }
            }
            EVENT_COMPLETED => {
                let p: CompletedPayload = frame.parse_payload()?;
                Self::Completed {
                    artifact_ref: p.embed,
                }
            }
            EVENT_ERROR => {
                let p: ErrorPayload = frame.parse_payload()?;
                Self::Error { message: p.message }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Returns the wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => EVENT_INITIATE,
            Self::Completed { .. } => EVENT_COMPLETED,
            Self::Error { .. } => EVENT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(event: &str, payload: serde_json::Value) -> Frame {
        Frame::new(Some("1".into()), None, "upload:tok", event, &payload).unwrap()
    }

    #[test]
    fn decodes_initiate() {
        let frame = push("initiate", serde_json::json!({"upload_id": "abc"}));
        let ev = ChannelEvent::from_frame(&frame).unwrap();
        assert_eq!(
            ev,
            Some(ChannelEvent::Initiate {
                session_id: "abc".into()
            })
        );
    }

    #[test]
    fn decodes_completed() {
        let frame = push("completed", serde_json::json!({"embed": "e123"}));
        let ev = ChannelEvent::from_frame(&frame).unwrap().unwrap();
        assert_eq!(
            ev,
            ChannelEvent::Completed {
                artifact_ref: "e123".into()
            }
        );
        assert_eq!(ev.name(), "completed");
    }

    #[test]
    fn decodes_error() {
        let frame = push("error", serde_json::json!({"message": "quota exceeded"}));
        let ev = ChannelEvent::from_frame(&frame).unwrap().unwrap();
        assert_eq!(
            ev,
            ChannelEvent::Error {
                message: "quota exceeded".into()
            }
        );
    }

    #[test]
    fn unknown_event_is_ignored() {
        let frame = push("presence_diff", serde_json::json!({}));
        assert_eq!(ChannelEvent::from_frame(&frame).unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let frame = push("initiate", serde_json::json!({"wrong": 1}));
        assert!(ChannelEvent::from_frame(&frame).is_err());
    }
}
