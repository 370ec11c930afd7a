//! Channel supervisor: owns the live link, rejoins with exponential
//! backoff when the transport drops, and handles leave requests.

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clipdrop_protocol::ChannelEvent;

use crate::pumps::read::ReadExit;
use crate::types::{ChannelState, ReconnectConfig, SignalingError};
use crate::ws_channel::{Link, LinkSettings};

/// Requests from the [`WsChannel`](crate::WsChannel) handle.
#[derive(Debug)]
pub(crate) enum Control {
    /// Leave the channel; acknowledged once done.
    Leave(oneshot::Sender<()>),
}

pub(crate) struct Supervisor {
    pub(crate) settings: LinkSettings,
    pub(crate) topic: String,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) events_tx: mpsc::Sender<ChannelEvent>,
    pub(crate) state_tx: watch::Sender<ChannelState>,
    pub(crate) control_rx: mpsc::Receiver<Control>,
    pub(crate) cancel: CancellationToken,
}

impl Supervisor {
    pub(crate) async fn run(mut self, mut link: Link) {
        loop {
            let exit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("channel handle dropped, closing socket");
                    break;
                }
                control = self.control_rx.recv() => {
                    if let Some(Control::Leave(done)) = control {
                        link.leave().await;
                        info!("left upload channel");
                        self.state_tx.send_replace(ChannelState::Closed);
                        let _ = done.send(());
                    }
                    break;
                }
                exit = link.closed() => exit,
            };

            if !exit.should_reconnect() {
                match exit {
                    ReadExit::ChannelClosed => info!("upload channel closed by the server"),
                    other => debug!(?other, "channel stopped"),
                }
                break;
            }

            warn!(?exit, "signaling connection lost");
            match self.rejoin().await {
                Some(new_link) => link = new_link,
                None => break,
            }
        }

        self.state_tx.send_replace(ChannelState::Closed);
    }

    /// Reconnects and rejoins the topic with backoff. Returns `None` when
    /// the channel should close instead.
    async fn rejoin(&mut self) -> Option<Link> {
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if self.reconnect.exhausted(attempt) {
                warn!(attempts = attempt - 1, "giving up on signaling reconnection");
                return None;
            }
            if self.events_tx.is_closed() {
                debug!("no event consumer left, not reconnecting");
                return None;
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            self.state_tx
                .send_replace(ChannelState::Reconnecting { attempt });
            info!(
                attempt,
                delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                "reconnecting"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                control = self.control_rx.recv() => {
                    // Nothing joined to leave.
                    if let Some(Control::Leave(done)) = control {
                        self.state_tx.send_replace(ChannelState::Closed);
                        let _ = done.send(());
                    }
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = Link::establish(&self.settings, &self.topic, self.events_tx.clone()) => result,
            };

            match result {
                Ok(link) => {
                    self.state_tx.send_replace(ChannelState::Joined);
                    info!(attempt, "rejoined upload channel");
                    return Some(link);
                }
                Err(SignalingError::JoinRejected(reason)) => {
                    warn!(%reason, "rejoin rejected, closing channel");
                    return None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}
