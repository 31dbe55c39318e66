use std::future::Future;
use std::pin::Pin;

use partflow_protocol::{ClientMessage, ServerMessage};

use crate::JobError;

/// Future returned by channel and connector methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A duplex live connection for one job.
///
/// The tracker implements this on top of a WebSocket; tests use scripted
/// channels.
pub trait JobChannel: Send {
    fn send(&mut self, msg: ClientMessage) -> ChannelFuture<'_, Result<(), JobError>>;

    /// Next message from the server. `None` once the connection is closed.
    fn recv(&mut self) -> ChannelFuture<'_, Option<Result<ServerMessage, JobError>>>;

    fn close(&mut self) -> ChannelFuture<'_, ()>;
}

/// Opens live job connections.
pub trait JobConnector: Send + Sync {
    fn connect(&self) -> ChannelFuture<'_, Result<Box<dyn JobChannel>, JobError>>;
}
