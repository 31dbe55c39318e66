//! WebSocket implementation of the live job channel.

use futures_util::{SinkExt, StreamExt};
use partflow_protocol::constants::LIVE_JOBS_PATH;
use partflow_protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::JobError;
use crate::channel::{ChannelFuture, JobChannel, JobConnector};

/// Largest message accepted from the server.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Connects to `<base>/api/2/jobs/live`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `base_url` is the websocket origin, e.g. `wss://api.example.com`.
    /// `http(s)://` origins are rewritten to `ws(s)://`.
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        Self {
            url: format!("{base}{LIVE_JOBS_PATH}"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl JobConnector for WsConnector {
    fn connect(&self) -> ChannelFuture<'_, Result<Box<dyn JobChannel>, JobError>> {
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);
            let (stream, _) =
                tokio_tungstenite::connect_async_with_config(self.url.as_str(), Some(ws_config), false)
                    .await?;
            debug!(url = %self.url, "job channel connected");
            Ok(Box::new(WsChannel { stream }) as Box<dyn JobChannel>)
        })
    }
}

/// A live job connection over a WebSocket.
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl JobChannel for WsChannel {
    fn send(&mut self, msg: ClientMessage) -> ChannelFuture<'_, Result<(), JobError>> {
        Box::pin(async move {
            let json = serde_json::to_string(&msg)?;
            self.stream
                .send(tungstenite::Message::Text(json.into()))
                .await?;
            Ok(())
        })
    }

    fn recv(&mut self) -> ChannelFuture<'_, Option<Result<ServerMessage, JobError>>> {
        Box::pin(async move {
            loop {
                let msg = match self.stream.next().await? {
                    Ok(msg) => msg,
                    Err(e) => return Some(Err(e.into())),
                };
                match msg {
                    tungstenite::Message::Text(text) => {
                        trace!(len = text.len(), "job channel message");
                        return Some(serde_json::from_str(&text).map_err(JobError::from));
                    }
                    tungstenite::Message::Ping(data) => {
                        if let Err(e) = self.stream.send(tungstenite::Message::Pong(data)).await {
                            return Some(Err(e.into()));
                        }
                    }
                    tungstenite::Message::Close(_) => {
                        debug!("job channel closed by server");
                        return None;
                    }
                    tungstenite::Message::Binary(_) => {
                        return Some(Err(JobError::Protocol(
                            "unexpected binary message".into(),
                        )));
                    }
                    _ => {}
                }
            }
        })
    }

    fn close(&mut self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.stream.close(None).await {
                match e {
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {}
                    e => warn!("failed to close job channel: {e}"),
                }
            }
        })
    }
}
