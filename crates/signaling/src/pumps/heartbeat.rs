//! Heartbeat pump: periodic `heartbeat` frames on the `phoenix` topic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use clipdrop_protocol::Frame;

use super::write::Outbound;

/// Sends a heartbeat every `period` so the server keeps the socket open.
///
/// Heartbeat replies are ordinary inbound traffic and keep the read
/// deadline from firing.
pub(crate) async fn heartbeat_pump(
    outbound_tx: mpsc::Sender<Outbound>,
    refs: Arc<AtomicU64>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let msg_ref = refs.fetch_add(1, Ordering::Relaxed).to_string();
                let frame = match Frame::heartbeat(&msg_ref) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("failed to build heartbeat: {e}");
                        continue;
                    }
                };
                trace!(msg_ref = %msg_ref, "heartbeat");
                if outbound_tx.send(Outbound::Frame(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_pump_sends_on_period() {
        tokio::time::pause();

        let (tx, mut rx) = mpsc::channel(16);
        let refs = Arc::new(AtomicU64::new(5));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_pump(
            tx,
            refs.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        match rx.recv().await {
            Some(Outbound::Frame(frame)) => {
                assert_eq!(frame.topic, "phoenix");
                assert_eq!(frame.event, "heartbeat");
                assert_eq!(frame.msg_ref.as_deref(), Some("5"));
            }
            other => panic!("expected heartbeat frame, got {other:?}"),
        }
        assert_eq!(refs.load(Ordering::Relaxed), 6);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_pump(
            tx,
            Arc::new(AtomicU64::new(1)),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
