//! Transport seam between the connection manager and the physical socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::errors::ClientError;

/// One live physical connection.
///
/// Frames are whole text messages; the transport guarantees in-order
/// delivery. Dropping `tx` closes the link; `rx` ending means the link
/// closed (normally or not).
pub struct Link {
    /// Outgoing frame queue.
    pub tx: mpsc::Sender<String>,
    /// Incoming frames, in receipt order.
    pub rx: mpsc::Receiver<String>,
}

/// Dials physical connections on behalf of the connection manager.
///
/// Each successful `connect` yields a fresh [`Link`]; the manager never
/// reuses a link after its receiver ends.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new physical connection.
    async fn connect(&self) -> Result<Link, ClientError>;
}

/// WebSocket connector speaking text frames via tokio-tungstenite.
pub struct WsConnector {
    url: String,
    send_queue: usize,
}

impl WsConnector {
    /// Connector dialing the given endpoint URL.
    pub fn new(url: impl Into<String>, send_queue: usize) -> Self {
        Self {
            url: url.into(),
            send_queue,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, ClientError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.send_queue);
        let (in_tx, in_rx) = mpsc::channel::<String>(self.send_queue);

        // Writer: drain the outbound queue into the socket.
        let _ = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader: forward text frames; socket error or close ends the link.
        let _ = tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    Message::Text(text) => {
                        if in_tx.send(text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Pings are answered by tungstenite itself.
                    _ => {}
                }
            }
            debug!("websocket read side ended");
        });

        Ok(Link {
            tx: out_tx,
            rx: in_rx,
        })
    }
}
