//! WebSocket carrier adapter
//!
//! Pumps a `tokio-tungstenite` stream into the transport abstraction. Binary
//! frames pass through byte-exact; text frames are delivered as their UTF-8
//! bytes. Carrier close or error surfaces as a single non-explicit `Closed`.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::{CarrierCmd, Transport};
use crate::error::TunnelError;

/// Dial a WebSocket URL and wrap the stream as a transport.
pub async fn connect(url: &str) -> Result<Transport, TunnelError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TunnelError::TransportClosed {
            reason: Some(e.to_string()),
        })?;
    Ok(spawn_carrier(ws))
}

/// Wrap an established WebSocket stream (dialed or accepted) as a transport,
/// spawning its pump task.
pub fn spawn_carrier<S>(ws: WebSocketStream<S>) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (transport, mut driver) = Transport::with_driver();

    tokio::spawn(async move {
        let (mut ws_tx, mut ws_rx) = ws.split();

        loop {
            tokio::select! {
                cmd = driver.commands.recv() => match cmd {
                    Some(CarrierCmd::Frame(frame)) => {
                        if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                            driver.handle.remote_closed(Some(e.to_string()));
                            break;
                        }
                    }
                    Some(CarrierCmd::Shutdown { .. }) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Binary(bytes))) => driver.handle.deliver(bytes),
                    Some(Ok(Message::Text(text))) => driver.handle.deliver(text.into_bytes()),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|r| !r.is_empty());
                        driver.handle.remote_closed(reason);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("websocket carrier error: {}", e);
                        driver.handle.remote_closed(Some(e.to_string()));
                        break;
                    }
                    None => {
                        driver.handle.remote_closed(None);
                        break;
                    }
                },
            }
        }
    });

    transport
}
