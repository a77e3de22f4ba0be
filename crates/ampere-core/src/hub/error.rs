//! Hub error types

use thiserror::Error;

use crate::protocol::{ConnectionId, ProtocolError};
use crate::token::TokenError;

/// Errors from connection registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live connection with this identity
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),

    /// Identity is already registered
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    /// Transport side of the connection is gone
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Errors from hub operations
#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to sign token: {0}")]
    Token(#[from] TokenError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
