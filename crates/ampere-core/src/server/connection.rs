//! Per-connection handling
//!
//! A writer task drains the hub's outbound queue into the socket while the
//! reader feeds replies back into the hub. The writer encodes in whatever
//! format the client used for `attach`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::hub::{ConnectionHandle, Hub};
use crate::protocol::{decode_frame, encode_frame, ClientMessage, WireFormat};

struct AttachRequest {
    page: String,
    store_token: Option<String>,
    format: WireFormat,
}

/// Run one client connection to completion
pub(super) async fn serve(
    socket: TcpStream,
    peer_addr: SocketAddr,
    hub: Hub,
    attach_timeout: Duration,
) -> Result<()> {
    let ws_stream = accept_async(socket)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws_stream.split();

    let request = tokio::time::timeout(attach_timeout, wait_for_attach(&mut read))
        .await
        .context("Timeout waiting for attach")??;

    let (handle, mut outbound) = ConnectionHandle::channel();
    let ctx = hub.attach(handle, &request.page, request.store_token.as_deref())?;
    let id = ctx.id();
    tracing::debug!(peer = %peer_addr, connection = %id, format = ?request.format, "Client attached");

    let format = request.format;
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = match encode_frame(&message, format) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(connection = %id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if write.send(frame).await.is_err() {
                break;
            }
        }
        write.close().await.ok();
    });

    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(Message::Close(_)) => break,
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "Read failed");
                break;
            }
        };

        match decode_frame::<ClientMessage>(&frame) {
            Ok(Some((ClientMessage::Reply(reply), _))) => {
                let reference = reply.reference;
                if !hub.handle_reply(&id, reply) {
                    tracing::debug!(connection = %id, reference = %reference, "Discarded reply");
                }
            }
            Ok(Some((ClientMessage::Attach { .. }, _))) => {
                tracing::debug!(connection = %id, "Ignoring repeated attach");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "Failed to decode client message");
            }
        }
    }

    hub.disconnect(&id);
    writer.abort();
    Ok(())
}

/// Read frames until the client sends `attach`
async fn wait_for_attach(read: &mut SplitStream<WebSocketStream<TcpStream>>) -> Result<AttachRequest> {
    while let Some(frame) = read.next().await {
        let frame = frame.context("Connection error during attach")?;
        if let Message::Close(_) = frame {
            break;
        }

        match decode_frame::<ClientMessage>(&frame) {
            Ok(Some((ClientMessage::Attach { page, store_token }, format))) => {
                return Ok(AttachRequest {
                    page,
                    store_token,
                    format,
                });
            }
            Ok(Some((ClientMessage::Reply(_), _))) => {
                tracing::debug!("Ignoring reply before attach");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode attach");
            }
        }
    }

    anyhow::bail!("Client closed connection during attach")
}
