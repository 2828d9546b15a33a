//! WebSocket transport in front of the relay owner task.
//!
//! Each accepted socket gets a writer task draining its outbound queue and a
//! reader loop forwarding text frames to [`RelayHandle::submit_frame`].

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::handle::{RelayError, RelayHandle};
use crate::types::ConnId;

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, handle: RelayHandle) -> std::io::Result<()> {
    serve_until(listener, handle, std::future::pending::<()>()).await
}

/// Accepts connections until `shutdown` resolves.
pub async fn serve_until<F>(listener: TcpListener, handle: RelayHandle, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listening");
    }
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, handle).await {
                        warn!(%peer, error = %err, "connection ended with error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("relay listener stopping");
                return Ok(());
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

async fn serve_connection(stream: TcpStream, handle: RelayHandle) -> Result<(), ConnectionError> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let joined = handle.join().await?;
    let conn = joined.id;
    let mut outbound = joined.outbound;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(err) = sink.send(Message::Text(frame.to_string())).await {
                debug!(conn, error = %err, "write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = source.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!(conn, error = %err, "read failed");
                break;
            }
        };
        match msg {
            Message::Text(text) => match handle.submit_frame(conn, text).await {
                Ok(_) => {}
                Err(RelayError::Codec(err)) => {
                    warn!(conn, error = %err, "ignoring malformed frame");
                }
                Err(RelayError::UnknownConnection(_)) => break,
                Err(err) => return finish(handle, conn, writer, Err(err.into())).await,
            },
            Message::Binary(_) => warn!(conn, "ignoring binary frame"),
            Message::Close(_) => break,
            _ => {}
        }
    }

    finish(handle, conn, writer, Ok(())).await
}

async fn finish(
    handle: RelayHandle,
    conn: ConnId,
    writer: tokio::task::JoinHandle<()>,
    out: Result<(), ConnectionError>,
) -> Result<(), ConnectionError> {
    // Dropping the relay's sender ends the writer.
    let _ = handle.leave(conn).await;
    let _ = writer.await;
    out
}
