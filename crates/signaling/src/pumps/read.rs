//! WebSocket read pump: routes replies and forwards channel events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use clipdrop_protocol::constants::MAX_FRAME_SIZE;
use clipdrop_protocol::{ChannelEvent, ControlEvent, Frame, ReplyPayload};

use super::write::Outbound;

/// Replies awaited by in-flight requests, keyed by message ref.
pub(crate) type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<ReplyPayload>>>>;

/// Why the read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadExit {
    /// Cancelled locally.
    Cancelled,
    /// The server closed the channel (`phx_close`). Do not rejoin.
    ChannelClosed,
    /// The channel process crashed server-side (`phx_error`). Rejoin.
    ChannelCrashed,
    /// Transport lost: socket error, close frame, stream end, or read deadline.
    Disconnected(String),
    /// Nobody is consuming events any more.
    ObserverGone,
}

impl ReadExit {
    /// Returns `true` if the supervisor should reconnect.
    pub(crate) fn should_reconnect(&self) -> bool {
        matches!(self, Self::ChannelCrashed | Self::Disconnected(_))
    }
}

/// Everything the read pump needs besides the stream itself.
pub(crate) struct ReadContext {
    pub(crate) topic: String,
    pub(crate) pending: PendingReplies,
    pub(crate) events_tx: mpsc::Sender<ChannelEvent>,
    pub(crate) outbound_tx: mpsc::Sender<Outbound>,
    pub(crate) read_deadline: Duration,
}

enum Dispatch {
    Continue,
    Exit(ReadExit),
}

/// Reads frames from the WebSocket and dispatches them.
///
/// Any inbound message resets the read deadline; if nothing arrives
/// within it the connection is considered dead.
///
/// Pending replies are dropped on exit so waiting requests fail fast.
pub(crate) async fn read_pump<S>(read: S, ctx: ReadContext, cancel: CancellationToken) -> ReadExit
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let exit = read_loop(read, &ctx, cancel).await;
    ctx.pending.lock().await.clear();
    exit
}

async fn read_loop<S>(mut read: S, ctx: &ReadContext, cancel: CancellationToken) -> ReadExit
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(ctx.read_deadline);
    tokio::pin!(deadline);

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return ReadExit::Cancelled,
            () = &mut deadline => {
                warn!("read deadline expired, connection dead");
                return ReadExit::Disconnected("read deadline expired".into());
            }
            msg = read.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("WebSocket read error: {e}");
                return ReadExit::Disconnected(e.to_string());
            }
            None => {
                debug!("WebSocket stream ended");
                return ReadExit::Disconnected("stream ended".into());
            }
        };

        deadline
            .as_mut()
            .reset(tokio::time::Instant::now() + ctx.read_deadline);

        match msg {
            tungstenite::Message::Text(text) => {
                if let Dispatch::Exit(exit) = handle_text(&text, ctx).await {
                    return exit;
                }
            }
            tungstenite::Message::Ping(data) => {
                trace!("received ping, sending pong");
                let _ = ctx.outbound_tx.send(Outbound::Pong(data)).await;
            }
            tungstenite::Message::Close(frame) => {
                debug!(?frame, "received close frame");
                return ReadExit::Disconnected("server closed socket".into());
            }
            _ => {} // Binary, pong, raw frames.
        }
    }
}

async fn handle_text(text: &str, ctx: &ReadContext) -> Dispatch {
    if text.len() > MAX_FRAME_SIZE {
        warn!("frame too large ({} bytes), dropping", text.len());
        return Dispatch::Continue;
    }

    let frame = match Frame::decode(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return Dispatch::Continue;
        }
    };

    trace!(event = %frame.event, msg_ref = ?frame.msg_ref, "received frame");

    match frame.control() {
        Some(ControlEvent::Reply) => {
            route_reply(&frame, &ctx.pending).await;
            Dispatch::Continue
        }
        Some(ControlEvent::Error) if frame.topic == ctx.topic => {
            warn!("channel crashed on the server");
            Dispatch::Exit(ReadExit::ChannelCrashed)
        }
        Some(ControlEvent::Close) if frame.topic == ctx.topic => {
            debug!("channel closed by the server");
            Dispatch::Exit(ReadExit::ChannelClosed)
        }
        Some(_) => Dispatch::Continue,
        None if frame.topic != ctx.topic => {
            trace!("ignoring frame for another topic");
            Dispatch::Continue
        }
        None => match ChannelEvent::from_frame(&frame) {
            Ok(Some(event)) => {
                debug!(event = event.name(), "channel event");
                if ctx.events_tx.send(event).await.is_err() {
                    return Dispatch::Exit(ReadExit::ObserverGone);
                }
                Dispatch::Continue
            }
            Ok(None) => {
                debug!(event = %frame.event, "ignoring unknown channel event");
                Dispatch::Continue
            }
            Err(e) => {
                warn!(event = %frame.event, "malformed event payload: {e}");
                Dispatch::Continue
            }
        },
    }
}

async fn route_reply(frame: &Frame, pending: &PendingReplies) {
    let Some(msg_ref) = frame.msg_ref.as_deref() else {
        return;
    };
    let Some(tx) = pending.lock().await.remove(msg_ref) else {
        // Heartbeat replies land here.
        trace!(msg_ref, "unsolicited reply");
        return;
    };
    match frame.parse_payload::<ReplyPayload>() {
        Ok(reply) => {
            let _ = tx.send(reply);
        }
        Err(e) => warn!(msg_ref, "malformed reply payload: {e}"),
    }
}
