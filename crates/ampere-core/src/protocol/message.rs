//! Envelope and message types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of one live client connection
///
/// Assigned when the socket is accepted and never reused; a reconnecting
/// client gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token for one synchronous instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(Uuid);

impl Reference {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Reference {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server to client instruction
///
/// `reference` is set only when the server is waiting for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Outcome reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Client to server reply for a synchronous instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub reference: Reference,
    pub status: ReplyStatus,
    #[serde(default)]
    pub result: Value,
}

impl ReplyEnvelope {
    /// Successful reply carrying `result`
    pub fn ok(reference: Reference, result: Value) -> Self {
        Self {
            reference,
            status: ReplyStatus::Ok,
            result,
        }
    }

    /// Failed reply carrying the error text
    pub fn error(reference: Reference, message: impl Into<String>) -> Self {
        Self {
            reference,
            status: ReplyStatus::Error,
            result: Value::String(message.into()),
        }
    }
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on a new socket
    Attach {
        /// Route of the page the client is showing
        page: String,
        /// Store token persisted from an earlier connection
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store_token: Option<String>,
    },

    /// Answer to a referenced instruction
    Reply(ReplyEnvelope),
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Attach acknowledged
    Attached {
        connection: ConnectionId,
        store_token: String,
        session_token: String,
    },

    /// Instruction to execute
    Instruction(InstructionEnvelope),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fire_envelope_omits_reference() {
        let envelope = InstructionEnvelope {
            reference: None,
            command: "exec".to_string(),
            payload: json!("console.log(1)"),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("reference").is_none());
        assert_eq!(value["command"], "exec");
    }

    #[test]
    fn test_reply_wire_shape() {
        let reference = Reference::new();
        let text = format!(
            r#"{{"type":"reply","reference":"{}","status":"error","result":"undefinedFn is not defined"}}"#,
            reference
        );
        let msg: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Reply(ReplyEnvelope::error(reference, "undefinedFn is not defined"))
        );
    }

    #[test]
    fn test_attach_without_token() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"attach","page":"/todo"}"#).unwrap();
        match msg {
            ClientMessage::Attach { page, store_token } => {
                assert_eq!(page, "/todo");
                assert!(store_token.is_none());
            }
            _ => panic!("Expected Attach message"),
        }
    }

    #[test]
    fn test_server_instruction_is_flat() {
        let reference = Reference::new();
        let msg = ServerMessage::Instruction(InstructionEnvelope {
            reference: Some(reference),
            command: "eval".to_string(),
            payload: json!("2 + 2"),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "instruction");
        assert_eq!(value["reference"], json!(reference.to_string()));
        assert_eq!(value["payload"], "2 + 2");
    }
}
