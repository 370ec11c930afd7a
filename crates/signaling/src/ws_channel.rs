//! WebSocket implementation of the signaling channel.
//!
//! One [`Link`] is one socket plus its pumps, joined to one topic. A
//! supervisor task owns the current link and replaces it when the
//! transport drops; the [`WsChannel`] handle only sees a continuous event
//! stream and a [`ChannelState`] watch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use clipdrop_protocol::constants::{
    DEFAULT_TOPIC_PREFIX, HEARTBEAT_INTERVAL, JOIN_TIMEOUT, MAX_FRAME_SIZE, READ_DEADLINE,
    SOCKET_VSN,
};
use clipdrop_protocol::{ChannelEvent, Frame, ReplyPayload, ReplyStatus};

use crate::channel::{BoxFuture, SignalingChannel, SignalingConnector};
use crate::pumps::heartbeat::heartbeat_pump;
use crate::pumps::read::{PendingReplies, ReadContext, ReadExit, read_pump};
use crate::pumps::write::{Outbound, write_pump};
use crate::reconnection::{Control, Supervisor};
use crate::types::{ChannelState, ReconnectConfig, SignalingError};

/// Buffered channel events before the read pump waits on the consumer.
const EVENT_BUFFER: usize = 64;

/// Buffered outbound frames.
const OUTBOUND_BUFFER: usize = 64;

/// Socket-level settings shared by every link of a channel.
#[derive(Debug, Clone)]
pub(crate) struct LinkSettings {
    pub(crate) url: String,
    pub(crate) join_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) read_deadline: Duration,
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One joined socket. Dropping it stops every pump.
pub(crate) struct Link {
    topic: String,
    join_ref: String,
    outbound_tx: mpsc::Sender<Outbound>,
    pending: PendingReplies,
    refs: Arc<AtomicU64>,
    reply_timeout: Duration,
    cancel: CancellationToken,
    read_handle: JoinHandle<ReadExit>,
    write_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
}

impl Link {
    /// Connects, starts the pumps and joins `topic`.
    pub(crate) async fn establish(
        settings: &LinkSettings,
        topic: &str,
        events_tx: mpsc::Sender<ChannelEvent>,
    ) -> Result<Self, SignalingError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_FRAME_SIZE);
        ws_config.max_frame_size = Some(MAX_FRAME_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(settings.url.as_str(), Some(ws_config), false)
                .await?;
        let (write, read) = ws_stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
        let pending: PendingReplies = Arc::default();
        let refs = Arc::new(AtomicU64::new(1));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(write_pump(write, outbound_rx, cancel.clone()));

        let read_handle = {
            let ctx = ReadContext {
                topic: topic.to_string(),
                pending: pending.clone(),
                events_tx,
                outbound_tx: outbound_tx.clone(),
                read_deadline: settings.read_deadline,
            };
            tokio::spawn(read_pump(read, ctx, cancel.clone()))
        };

        let heartbeat_handle = tokio::spawn(heartbeat_pump(
            outbound_tx.clone(),
            refs.clone(),
            settings.heartbeat_interval,
            cancel.clone(),
        ));

        let join_ref = refs.fetch_add(1, Ordering::Relaxed).to_string();
        let link = Self {
            topic: topic.to_string(),
            join_ref,
            outbound_tx,
            pending,
            refs,
            reply_timeout: settings.join_timeout,
            cancel,
            read_handle,
            write_handle,
            heartbeat_handle,
        };

        link.join().await?;
        Ok(link)
    }

    async fn join(&self) -> Result<(), SignalingError> {
        let frame = Frame::join(&self.topic, &self.join_ref)?;
        let reply = self.request(frame, self.join_ref.clone()).await?;
        match reply.status {
            ReplyStatus::Ok => Ok(()),
            ReplyStatus::Error | ReplyStatus::Timeout => {
                Err(SignalingError::JoinRejected(reply.reason()))
            }
        }
    }

    /// Sends `phx_leave` and waits briefly for the acknowledgement.
    pub(crate) async fn leave(&self) {
        let msg_ref = self.refs.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = match Frame::leave(&self.topic, &self.join_ref, &msg_ref) {
            Ok(f) => f,
            Err(e) => {
                warn!("failed to build leave frame: {e}");
                return;
            }
        };
        match self.request(frame, msg_ref).await {
            Ok(_) => debug!("leave acknowledged"),
            Err(e) => debug!("leave not acknowledged: {e}"),
        }
    }

    /// Sends a frame and waits for the `phx_reply` carrying `msg_ref`.
    async fn request(&self, frame: Frame, msg_ref: String) -> Result<ReplyPayload, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(msg_ref.clone(), tx);

        if self.outbound_tx.send(Outbound::Frame(frame)).await.is_err() {
            self.pending.lock().await.remove(&msg_ref);
            return Err(SignalingError::Closed);
        }

        let result = tokio::time::timeout(self.reply_timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&msg_ref);

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SignalingError::Closed),
            Err(_) => Err(SignalingError::Timeout),
        }
    }

    /// Resolves once the read pump stops. Must not be awaited again after
    /// it returned.
    pub(crate) async fn closed(&mut self) -> ReadExit {
        match (&mut self.read_handle).await {
            Ok(exit) => exit,
            Err(e) => ReadExit::Disconnected(format!("read pump failed: {e}")),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.heartbeat_handle.abort();
    }
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

/// Joins upload channels over a Phoenix-style WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    settings: LinkSettings,
    topic_prefix: String,
    reconnect: ReconnectConfig,
}

impl WsConnector {
    /// Creates a connector for the socket at `url`
    /// (e.g. `wss://example.com/socket/websocket`).
    ///
    /// The serializer version query parameter is added if missing.
    pub fn new(url: &str) -> Self {
        Self {
            settings: LinkSettings {
                url: with_vsn(url),
                join_timeout: JOIN_TIMEOUT,
                heartbeat_interval: HEARTBEAT_INTERVAL,
                read_deadline: READ_DEADLINE,
            },
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Sets the topic prefix; the token is appended to form the topic.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Sets the transport reconnection policy.
    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Sets how long join and leave requests wait for a reply.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.settings.join_timeout = timeout;
        self
    }

    /// Sets the heartbeat period.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.settings.heartbeat_interval = interval;
        self
    }

    /// Sets the read deadline after which a silent socket is dropped.
    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.settings.read_deadline = deadline;
        self
    }

    /// Socket URL including the `vsn` parameter.
    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Connects and joins the channel for `token`.
    pub async fn connect(&self, token: &str) -> Result<WsChannel, SignalingError> {
        let topic = format!("{}{}", self.topic_prefix, token);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(ChannelState::Joining);

        let link = Link::establish(&self.settings, &topic, events_tx.clone()).await?;
        state_tx.send_replace(ChannelState::Joined);
        info!(prefix = %self.topic_prefix, "joined upload channel");

        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::channel(1);
        let supervisor = Supervisor {
            settings: self.settings.clone(),
            topic: topic.clone(),
            reconnect: self.reconnect.clone(),
            events_tx,
            state_tx,
            control_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run(link));

        Ok(WsChannel {
            topic,
            events: Some(events_rx),
            state: state_rx,
            control_tx,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }
}

impl SignalingConnector for WsConnector {
    fn join<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn SignalingChannel>, SignalingError>> {
        Box::pin(async move {
            let channel = self.connect(token).await?;
            Ok(Box::new(channel) as Box<dyn SignalingChannel>)
        })
    }
}

fn with_vsn(url: &str) -> String {
    if url.contains("vsn=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&vsn={SOCKET_VSN}")
    } else {
        format!("{url}?vsn={SOCKET_VSN}")
    }
}

// ---------------------------------------------------------------------------
// WsChannel
// ---------------------------------------------------------------------------

/// A joined WebSocket channel.
///
/// Dropping it stops the supervisor and closes the socket without
/// sending `phx_leave`.
pub struct WsChannel {
    topic: String,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    state: watch::Receiver<ChannelState>,
    control_tx: mpsc::Sender<Control>,
    _cancel_on_drop: DropGuard,
}

impl WsChannel {
    /// Watch of the channel lifecycle.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control_tx.send(Control::Leave(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl SignalingChannel for WsChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    fn leave(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(self.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    type ServerWs = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/socket/websocket", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    /// Next non-heartbeat frame from the client.
    async fn next_frame(ws: &mut ServerWs) -> Frame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    let frame = Frame::decode(&text).unwrap();
                    if frame.event != "heartbeat" {
                        return frame;
                    }
                }
                _ => continue,
            }
        }
    }

    async fn reply(ws: &mut ServerWs, to: &Frame, status: &str, response: serde_json::Value) {
        let frame = Frame::new(
            to.join_ref.clone(),
            to.msg_ref.clone(),
            to.topic.clone(),
            "phx_reply",
            &json!({ "status": status, "response": response }),
        )
        .unwrap();
        ws.send(Message::Text(frame.encode().unwrap().into()))
            .await
            .unwrap();
    }

    async fn push(ws: &mut ServerWs, topic: &str, event: &str, payload: serde_json::Value) {
        let frame = Frame::new(Some("1".into()), None, topic, event, &payload).unwrap();
        ws.send(Message::Text(frame.encode().unwrap().into()))
            .await
            .unwrap();
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 1.0,
            max_attempts: Some(5),
        }
    }

    #[test]
    fn vsn_appended_once() {
        assert_eq!(with_vsn("ws://h/socket/websocket"), "ws://h/socket/websocket?vsn=2.0.0");
        assert_eq!(with_vsn("ws://h/s?x=1"), "ws://h/s?x=1&vsn=2.0.0");
        assert_eq!(with_vsn("ws://h/s?vsn=1.0.0"), "ws://h/s?vsn=1.0.0");
    }

    #[tokio::test]
    async fn join_receive_and_leave() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            assert_eq!(join.topic, "upload:tok-1");
            assert_eq!(join.event, "phx_join");
            reply(&mut ws, &join, "ok", json!({})).await;

            push(&mut ws, "upload:tok-1", "initiate", json!({ "upload_id": "sess-9" })).await;
            push(&mut ws, "upload:tok-1", "completed", json!({ "embed": "emb-1" })).await;

            let leave = next_frame(&mut ws).await;
            assert_eq!(leave.event, "phx_leave");
            reply(&mut ws, &leave, "ok", json!({})).await;
        });

        let connector = WsConnector::new(&url);
        let mut channel = connector.connect("tok-1").await.unwrap();
        assert_eq!(channel.topic(), "upload:tok-1");
        let state = channel.state();
        assert_eq!(*state.borrow(), ChannelState::Joined);

        let mut events = channel.take_events().unwrap();
        assert!(channel.take_events().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Initiate {
                session_id: "sess-9".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Completed {
                artifact_ref: "emb-1".into()
            }
        );

        Box::new(channel).leave().await;
        server.await.unwrap();
        assert_eq!(*state.borrow(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn join_rejected() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            reply(&mut ws, &join, "error", json!({ "reason": "unauthorized" })).await;
            // Keep the socket open until the client hangs up.
            while ws.next().await.is_some() {}
        });

        let err = WsConnector::new(&url).connect("bad").await.err().unwrap();
        assert!(matches!(err, SignalingError::JoinRejected(ref r) if r == "unauthorized"));
    }

    #[tokio::test]
    async fn join_times_out() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            while ws.next().await.is_some() {}
        });

        let err = WsConnector::new(&url)
            .with_join_timeout(Duration::from_millis(100))
            .connect("tok")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SignalingError::Timeout));
    }

    #[tokio::test]
    async fn connection_refused_is_ws_error() {
        let (listener, url) = listen().await;
        drop(listener);
        let err = WsConnector::new(&url).connect("tok").await.err().unwrap();
        assert!(matches!(err, SignalingError::Ws(_)));
    }

    #[tokio::test]
    async fn rejoins_after_transport_loss() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            // First connection: join, then drop the socket.
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            reply(&mut ws, &join, "ok", json!({})).await;
            drop(ws);

            // Second connection: rejoin the same topic and push.
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            assert_eq!(join.topic, "upload:tok");
            reply(&mut ws, &join, "ok", json!({})).await;
            push(&mut ws, "upload:tok", "initiate", json!({ "upload_id": "after" })).await;
            while ws.next().await.is_some() {}
        });

        let mut channel = WsConnector::new(&url)
            .with_reconnect(fast_reconnect())
            .connect("tok")
            .await
            .unwrap();
        let mut events = channel.take_events().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event after rejoin")
            .unwrap();
        assert_eq!(
            event,
            ChannelEvent::Initiate {
                session_id: "after".into()
            }
        );
        assert_eq!(*channel.state().borrow(), ChannelState::Joined);
    }

    #[tokio::test]
    async fn server_close_ends_event_stream() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            reply(&mut ws, &join, "ok", json!({})).await;
            push(&mut ws, "upload:tok", "phx_close", json!({})).await;
            while ws.next().await.is_some() {}
        });

        let mut channel = WsConnector::new(&url).connect("tok").await.unwrap();
        let mut events = channel.take_events().unwrap();
        let mut state = channel.state();

        let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("stream should end");
        assert!(end.is_none());
        state
            .wait_for(|s| *s == ChannelState::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (listener, url) = listen().await;
        let mut config = fast_reconnect();
        config.max_attempts = Some(2);

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_frame(&mut ws).await;
            reply(&mut ws, &join, "ok", json!({})).await;
            // Dropping the listener makes every reconnect fail.
        });

        let mut channel = WsConnector::new(&url)
            .with_reconnect(config)
            .connect("tok")
            .await
            .unwrap();
        server.await.unwrap();

        let mut events = channel.take_events().unwrap();
        let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("stream should end");
        assert!(end.is_none());
        assert_eq!(*channel.state().borrow(), ChannelState::Closed);
    }
}
