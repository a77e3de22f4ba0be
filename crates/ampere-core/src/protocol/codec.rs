//! Frame encoding
//!
//! Text frames are JSON, binary frames are CBOR.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use super::error::ProtocolError;

/// Encoding used on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Cbor,
}

/// Encode a message into a WebSocket frame
pub fn encode_frame<T: Serialize>(message: &T, format: WireFormat) -> Result<Message, ProtocolError> {
    match format {
        WireFormat::Json => Ok(Message::Text(serde_json::to_string(message)?)),
        WireFormat::Cbor => {
            let mut bytes = Vec::new();
            ciborium::into_writer(message, &mut bytes)?;
            Ok(Message::Binary(bytes))
        }
    }
}

/// Decode a WebSocket frame
///
/// Returns `Ok(None)` for control frames (ping, pong, close).
pub fn decode_frame<T: DeserializeOwned>(frame: &Message) -> Result<Option<(T, WireFormat)>, ProtocolError> {
    match frame {
        Message::Text(text) => Ok(Some((serde_json::from_str(text)?, WireFormat::Json))),
        Message::Binary(bytes) => Ok(Some((
            ciborium::from_reader(bytes.as_slice())?,
            WireFormat::Cbor,
        ))),
        _ => Ok(None),
    }
}
