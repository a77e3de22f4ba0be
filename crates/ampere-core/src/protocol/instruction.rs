//! Typed instruction vocabulary
//!
//! Server code builds [`Instruction`] values; the envelope on the wire keeps
//! the open `{command, payload}` shape. Translation happens here, including the
//! older command spellings clients may still send or expect.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ProtocolError;
use super::message::{InstructionEnvelope, Reference};

/// Every accepted command name, aliases included
const COMMANDS: &[&str] = &[
    "eval",
    "evaluate",
    "js",
    "exec",
    "script",
    "run",
    "set_attribute",
    "attr",
    "attribute",
    "set_property",
    "prop",
    "property",
    "get_property",
    "replace_content",
    "html",
    "replace",
    "store",
    "store_token",
];

/// Instructions a server can push to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Instruction {
    /// Evaluate code and reply with its value
    #[serde(alias = "evaluate", alias = "js")]
    Eval(String),

    /// Run code for its side effects
    #[serde(alias = "script", alias = "run")]
    Exec(String),

    /// Set a DOM attribute on tagged nodes
    #[serde(alias = "attr", alias = "attribute")]
    SetAttribute(AttributePatch),

    /// Write a property path on tagged nodes
    #[serde(alias = "prop", alias = "property")]
    SetProperty(PropertyPatch),

    /// Read a property path from tagged nodes
    GetProperty(PropertyQuery),

    /// Replace the content of tagged nodes
    #[serde(alias = "html", alias = "replace")]
    ReplaceContent(ContentPatch),

    /// Persist a new store token
    #[serde(alias = "store_token")]
    Store(String),
}

/// `set_attribute` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePatch {
    pub ampere: String,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

impl AttributePatch {
    pub fn new(ampere: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            ampere: ampere.into(),
            name: name.into(),
            value: value.into(),
            partial: None,
        }
    }

    /// Restrict the patch to one partial region instance
    pub fn in_partial(mut self, partial: impl Into<String>) -> Self {
        self.partial = Some(partial.into());
        self
    }
}

/// `set_property` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPatch {
    pub ampere: String,
    pub path: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

impl PropertyPatch {
    pub fn new(ampere: impl Into<String>, path: impl Into<String>, value: Value) -> Self {
        Self {
            ampere: ampere.into(),
            path: path.into(),
            value,
            partial: None,
        }
    }

    /// Restrict the patch to one partial region instance
    pub fn in_partial(mut self, partial: impl Into<String>) -> Self {
        self.partial = Some(partial.into());
        self
    }
}

/// `get_property` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyQuery {
    pub ampere: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

/// `replace_content` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPatch {
    pub ampere: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
    /// Evaluate `html` as code instead of injecting markup
    #[serde(default)]
    pub script: bool,
}

impl ContentPatch {
    pub fn new(ampere: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            ampere: ampere.into(),
            html: html.into(),
            partial: None,
            script: false,
        }
    }

    /// Restrict the patch to one partial region instance
    pub fn in_partial(mut self, partial: impl Into<String>) -> Self {
        self.partial = Some(partial.into());
        self
    }

    /// Treat the content as a script
    pub fn as_script(mut self) -> Self {
        self.script = true;
        self
    }
}

impl Instruction {
    /// Canonical command name
    pub fn command(&self) -> &'static str {
        match self {
            Instruction::Eval(_) => "eval",
            Instruction::Exec(_) => "exec",
            Instruction::SetAttribute(_) => "set_attribute",
            Instruction::SetProperty(_) => "set_property",
            Instruction::GetProperty(_) => "get_property",
            Instruction::ReplaceContent(_) => "replace_content",
            Instruction::Store(_) => "store",
        }
    }

    /// Wrap into a wire envelope
    pub fn into_envelope(self, reference: Option<Reference>) -> Result<InstructionEnvelope, ProtocolError> {
        let command = self.command().to_string();
        let payload = match serde_json::to_value(&self)? {
            Value::Object(mut map) => map.remove("payload").unwrap_or(Value::Null),
            other => other,
        };

        Ok(InstructionEnvelope {
            reference,
            command,
            payload,
        })
    }

    /// Translate an open-ended wire command into a typed instruction
    pub fn from_wire(command: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let normalized = command.trim().to_ascii_lowercase().replace('-', "_");
        if !COMMANDS.contains(&normalized.as_str()) {
            return Err(ProtocolError::UnknownCommand(command.to_string()));
        }

        serde_json::from_value(json!({ "command": normalized, "payload": payload })).map_err(
            |source| ProtocolError::InvalidPayload {
                command: command.to_string(),
                source,
            },
        )
    }

    /// Translate a received envelope
    pub fn from_envelope(envelope: &InstructionEnvelope) -> Result<Self, ProtocolError> {
        Self::from_wire(&envelope.command, &envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_payload_is_bare_code() {
        let envelope = Instruction::Eval("2 + 2".to_string())
            .into_envelope(Some(Reference::new()))
            .unwrap();
        assert_eq!(envelope.command, "eval");
        assert_eq!(envelope.payload, json!("2 + 2"));
    }

    #[test]
    fn test_patch_payload_shape() {
        let envelope = Instruction::SetAttribute(AttributePatch::new("a1", "data-n", "1").in_partial("row1"))
            .into_envelope(None)
            .unwrap();
        assert_eq!(envelope.command, "set_attribute");
        assert_eq!(
            envelope.payload,
            json!({"ampere": "a1", "name": "data-n", "value": "1", "partial": "row1"})
        );
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(
            Instruction::from_wire("js", &json!("1")).unwrap(),
            Instruction::Eval("1".to_string())
        );
        assert_eq!(
            Instruction::from_wire("Replace-Content", &json!({"ampere": "x", "html": "<b>hi</b>"})).unwrap(),
            Instruction::ReplaceContent(ContentPatch::new("x", "<b>hi</b>"))
        );
        assert!(matches!(
            Instruction::from_wire("prop", &json!({"ampere": "x", "path": "style.color", "value": "red"})),
            Ok(Instruction::SetProperty(_))
        ));
    }

    #[test]
    fn test_unknown_command() {
        let err = Instruction::from_wire("launch_missiles", &Value::Null).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(ref c) if c == "launch_missiles"));
        assert_eq!(err.to_string(), "unknown command 'launch_missiles'");
    }

    #[test]
    fn test_invalid_payload() {
        let err = Instruction::from_wire("set_attribute", &json!({"ampere": "x"})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_envelope_translation_is_stable() {
        let original = Instruction::ReplaceContent(ContentPatch::new("x", "alert(1)").in_partial("p").as_script());
        let envelope = original.clone().into_envelope(None).unwrap();
        assert_eq!(Instruction::from_envelope(&envelope).unwrap(), original);
    }
}
