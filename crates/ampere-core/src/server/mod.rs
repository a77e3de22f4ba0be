//! WebSocket transport for the hub
//!
//! Accepts TCP connections, upgrades them to WebSocket, waits for the
//! client's `attach` and then shuttles messages between the socket and the
//! [`crate::hub::Hub`]. Closing the socket disconnects the client from the
//! hub, which cancels its pending calls.

mod connection;
mod listener;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

pub use listener::AmpereServer;

use crate::config::Config;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Time a new socket has to send `attach`
    pub attach_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            max_connections: 0,
            attach_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Server settings from the application configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let bind_addr = config
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", config.bind_addr))?;

        Ok(Self {
            bind_addr,
            max_connections: config.max_connections,
            ..Self::default()
        })
    }
}
