//! Persistent client connection
//!
//! Maintains a long-lived WebSocket connection to an ampere server, attaches
//! with the stored token and executes incoming instructions. Handles
//! reconnection automatically with exponential backoff; every reconnect
//! attaches again and so restores the store from the latest token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::dispatcher::Dispatcher;
use crate::protocol::{decode_frame, encode_frame, ClientMessage, ConnectionId, ServerMessage, WireFormat};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands sent to the client task
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Close the connection and stop reconnecting
    Shutdown,
}

/// Events emitted by the client task
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// Server acknowledged the attach
    Attached(ConnectionId),
    /// An instruction was executed
    Executed { command: String, replied: bool },
    /// Error occurred
    Error(String),
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Attached and executing instructions
    Connected,
}

/// Handle to control the client task
pub struct ClientHandle {
    /// Send commands to the client task
    pub command_tx: mpsc::Sender<ClientCommand>,
    /// Receive events from the client task
    pub event_rx: mpsc::Receiver<ClientEvent>,
    /// Watch connection status
    pub status_rx: watch::Receiver<ConnectionStatus>,
}

/// Configuration for the client task
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL
    pub url: String,
    /// Page route sent in the attach message
    pub page: String,
    /// Frame encoding
    pub format: WireFormat,
    /// How long to wait for the attach acknowledgement
    pub attach_timeout: Duration,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            page: "/".to_string(),
            format: WireFormat::Json,
            attach_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Spawn a persistent client task
///
/// The dispatcher is shared so callers can inspect the document while the
/// task runs.
pub fn spawn_client(config: ClientConfig, dispatcher: Arc<Mutex<Dispatcher>>) -> ClientHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

    tokio::spawn(client_task_loop(
        config, dispatcher, command_rx, event_tx, status_tx,
    ));

    ClientHandle {
        command_tx,
        event_rx,
        status_rx,
    }
}

/// Main client loop with reconnection
async fn client_task_loop(
    config: ClientConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ClientEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        set_status(&status_tx, &event_tx, ConnectionStatus::Connecting).await;

        match connect_and_run(&config, &dispatcher, &mut command_rx, &event_tx, &status_tx).await {
            Ok(true) => {
                set_status(&status_tx, &event_tx, ConnectionStatus::Disconnected).await;
                break;
            }
            Ok(false) => {
                // Connection closed normally, reset backoff
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "Connection failed");
                let _ = event_tx
                    .send(ClientEvent::Error(format!("Connection error: {}", e)))
                    .await;
            }
        }

        set_status(&status_tx, &event_tx, ConnectionStatus::Disconnected).await;

        // Wait before reconnecting, but check for shutdown command
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Shutdown) | None => break,
                }
            }
        }
    }
}

async fn set_status(
    status_tx: &watch::Sender<ConnectionStatus>,
    event_tx: &mpsc::Sender<ClientEvent>,
    status: ConnectionStatus,
) {
    let _ = status_tx.send(status);
    let _ = event_tx.send(ClientEvent::StatusChanged(status)).await;
}

/// Connect, attach and execute instructions until disconnection or shutdown
///
/// Returns `Ok(true)` on shutdown.
async fn connect_and_run(
    config: &ClientConfig,
    dispatcher: &Arc<Mutex<Dispatcher>>,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    event_tx: &mpsc::Sender<ClientEvent>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> Result<bool> {
    let (ws_stream, _) = connect_async(config.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let store_token = dispatcher.lock().await.stored_token();
    let attach = ClientMessage::Attach {
        page: config.page.clone(),
        store_token,
    };
    write.send(encode_frame(&attach, config.format)?).await?;

    let connection = wait_for_attached(&mut read, dispatcher, config.attach_timeout).await?;
    tracing::info!(url = %config.url, connection = %connection, "Attached");

    set_status(status_tx, event_tx, ConnectionStatus::Connected).await;
    let _ = event_tx.send(ClientEvent::Attached(connection)).await;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Shutdown) | None => {
                        write.close().await.ok();
                        return Ok(true);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return Ok(false),
                    Some(Ok(frame)) => {
                        handle_frame(&frame, config.format, dispatcher, &mut write, event_tx).await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

/// Wait for the server's attach acknowledgement
async fn wait_for_attached(
    read: &mut SplitStream<Socket>,
    dispatcher: &Arc<Mutex<Dispatcher>>,
    timeout: Duration,
) -> Result<ConnectionId> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            anyhow::bail!("Timeout waiting for attach. Check that the server is running.");
        }

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("Server closed connection during attach");
                    }
                    Some(Ok(frame)) => {
                        if let Ok(Some((ServerMessage::Attached { connection, store_token, session_token }, _))) =
                            decode_frame::<ServerMessage>(&frame)
                        {
                            dispatcher.lock().await.attached(&store_token, &session_token);
                            return Ok(connection);
                        }
                    }
                    Some(Err(e)) => {
                        anyhow::bail!("Connection error during attach: {}", e);
                    }
                }
            }
            _ = tokio::time::sleep(remaining) => {
                anyhow::bail!("Timeout waiting for attach. Check that the server is running.");
            }
        }
    }
}

/// Execute one incoming frame and send the reply, if any
async fn handle_frame(
    frame: &Message,
    format: WireFormat,
    dispatcher: &Arc<Mutex<Dispatcher>>,
    write: &mut SplitSink<Socket, Message>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Result<()> {
    let envelope = match decode_frame::<ServerMessage>(frame) {
        Ok(Some((ServerMessage::Instruction(envelope), _))) => envelope,
        Ok(Some((ServerMessage::Attached { .. }, _))) | Ok(None) => return Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to decode server message");
            return Ok(());
        }
    };

    let reply = dispatcher.lock().await.handle(&envelope);
    let replied = reply.is_some();
    if let Some(reply) = reply {
        write
            .send(encode_frame(&ClientMessage::Reply(reply), format)?)
            .await?;
    }

    let _ = event_tx
        .send(ClientEvent::Executed {
            command: envelope.command,
            replied,
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.page, "/");
        assert_eq!(config.format, WireFormat::Json);
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    }
}
