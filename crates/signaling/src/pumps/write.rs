//! WebSocket write pump: encodes and sends outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use clipdrop_protocol::Frame;

/// Something to put on the socket.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A protocol frame, JSON-encoded as a text message.
    Frame(Frame),
    /// Answer to a transport-level ping.
    Pong(tungstenite::Bytes),
}

/// Writes outbound frames to the WebSocket until cancelled or the
/// queue closes, then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound_rx.recv() => next,
        };
        let msg = match next {
            Some(Outbound::Frame(frame)) => match frame.encode() {
                Ok(text) => {
                    trace!(topic = %frame.topic, event = %frame.event, "sending frame");
                    tungstenite::Message::Text(text.into())
                }
                Err(e) => {
                    warn!(event = %frame.event, "failed to encode frame: {e}");
                    continue;
                }
            },
            Some(Outbound::Pong(data)) => tungstenite::Message::Pong(data),
            None => break,
        };
        if let Err(e) = write.send(msg).await {
            error!("WebSocket write error: {e}");
            break;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
