//! Contract between the upload coordinator and a signaling transport.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use clipdrop_protocol::ChannelEvent;

use crate::types::SignalingError;

/// Boxed future used by the object-safe traits below.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opens signaling channels scoped to an authorization token.
pub trait SignalingConnector: Send + Sync {
    /// Joins the channel for `token`. Resolves once the server accepted
    /// the join.
    fn join<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn SignalingChannel>, SignalingError>>;
}

/// A joined signaling channel.
///
/// Dropping the channel without [`leave`](SignalingChannel::leave) tears
/// the transport down without notifying the server.
pub trait SignalingChannel: Send {
    /// Topic this channel joined.
    fn topic(&self) -> &str;

    /// Takes the event stream. Returns `None` after the first call.
    ///
    /// The stream ends when the channel is closed for good (left, closed
    /// by the server, or reconnection gave up).
    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>>;

    /// Leaves the channel.
    fn leave(self: Box<Self>) -> BoxFuture<'static, ()>;
}
