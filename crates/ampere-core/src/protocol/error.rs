//! Protocol error types

use thiserror::Error;

/// Errors raised while encoding, decoding or translating messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding failed
    #[error("CBOR encoding failed: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    /// CBOR decoding failed
    #[error("CBOR decoding failed: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    /// Command name is not part of the instruction vocabulary
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Command is known but its payload has the wrong shape
    #[error("invalid payload for '{command}': {source}")]
    InvalidPayload {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}
