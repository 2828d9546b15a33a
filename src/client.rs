//! Minimal WebSocket client for the relay.
//!
//! Pairs with [`crate::core::session::Session`]: feed the bootstrap payload to
//! `Session::bootstrap`, send local patches with [`RelayClient::send_batch`] and
//! pass every received batch to `Session::receive`.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::patch::{Patch, PatchBatch};

/// Client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Frame was not a JSON patch list.
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
    /// The socket closed before the first frame.
    #[error("connection closed before bootstrap")]
    NoBootstrap,
}

/// Connected relay client.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Connects to `url` and waits for the bootstrap payload.
    pub async fn connect(url: &str) -> Result<(Self, Vec<Patch>), ClientError> {
        let (ws, _) = connect_async(url).await?;
        let mut client = Self { ws };
        let bootstrap = client.next_batch().await?.ok_or(ClientError::NoBootstrap)?;
        debug!(url, patches = bootstrap.len(), "bootstrapped from relay");
        Ok((client, bootstrap))
    }

    /// Sends local forward patches as one text frame.
    pub async fn send_batch(&mut self, batch: &[Patch]) -> Result<(), ClientError> {
        let text = serde_json::to_string(batch)?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Next batch broadcast by the relay, or `None` once the socket closes.
    pub async fn next_batch(&mut self) -> Result<Option<PatchBatch>, ClientError> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                Message::Binary(_) => warn!("ignoring binary frame from relay"),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Closes the socket.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
