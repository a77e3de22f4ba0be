//! Instruction dispatcher
//!
//! Executes server instructions against the local [`SyncEngine`] and turns
//! the outcome into a reply. Every failure (unknown command, bad payload,
//! script error) becomes an `error` reply when the server is waiting, so a
//! pending call on the server always resolves.

use std::sync::Arc;

use serde_json::Value;

use super::storage::TokenStorage;
use crate::dom::{Replacement, SyncEngine};
use crate::protocol::{Instruction, InstructionEnvelope, ReplyEnvelope};
use crate::token;
use crate::KeyValues;

/// Client-side executor for server instructions
pub struct Dispatcher {
    engine: SyncEngine,
    storage: Arc<dyn TokenStorage>,
    session_token: Option<String>,
}

impl Dispatcher {
    pub fn new(engine: SyncEngine, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            engine,
            storage,
            session_token: None,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        &mut self.engine
    }

    /// Store token to present when attaching
    ///
    /// A storage failure is logged and treated as no token.
    pub fn stored_token(&self) -> Option<String> {
        match self.storage.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load store token");
                None
            }
        }
    }

    /// Record the tokens from the server's attach acknowledgement
    pub fn attached(&mut self, store_token: &str, session_token: &str) {
        self.persist(store_token);
        self.session_token = Some(session_token.to_string());
    }

    /// Current store contents as last signed by the server
    pub fn store(&self) -> KeyValues {
        self.stored_token()
            .and_then(|t| token::inspect(&t).ok())
            .unwrap_or_default()
    }

    /// Session snapshot received at attach
    pub fn session(&self) -> KeyValues {
        self.session_token
            .as_deref()
            .and_then(|t| token::inspect(t).ok())
            .unwrap_or_default()
    }

    /// Execute one instruction
    ///
    /// Returns the reply to send, if the server asked for one.
    pub fn handle(&mut self, envelope: &InstructionEnvelope) -> Option<ReplyEnvelope> {
        let outcome = self.execute(envelope);

        match (envelope.reference, outcome) {
            (Some(reference), Ok(value)) => Some(ReplyEnvelope::ok(reference, value)),
            (Some(reference), Err(message)) => {
                tracing::debug!(command = %envelope.command, error = %message, "Instruction failed");
                Some(ReplyEnvelope::error(reference, message))
            }
            (None, Ok(_)) => None,
            (None, Err(message)) => {
                tracing::warn!(command = %envelope.command, error = %message, "Instruction failed");
                None
            }
        }
    }

    fn execute(&mut self, envelope: &InstructionEnvelope) -> Result<Value, String> {
        let instruction = Instruction::from_envelope(envelope).map_err(|e| e.to_string())?;

        match instruction {
            Instruction::Eval(code) => self.engine.evaluate(&code).map_err(|e| e.to_string()),
            Instruction::Exec(code) => self
                .engine
                .evaluate(&code)
                .map(|_| Value::Null)
                .map_err(|e| e.to_string()),
            Instruction::SetAttribute(patch) => self
                .engine
                .set_attribute(&patch)
                .map(Value::from)
                .map_err(|e| e.to_string()),
            Instruction::SetProperty(patch) => self
                .engine
                .set_property(&patch)
                .map(Value::from)
                .map_err(|e| e.to_string()),
            Instruction::GetProperty(query) => {
                Ok(self.engine.get_property(&query).unwrap_or(Value::Null))
            }
            Instruction::ReplaceContent(patch) => {
                match self.engine.replace_content(&patch).map_err(|e| e.to_string())? {
                    Replacement::Skipped => Ok(Value::Null),
                    Replacement::Replaced(count) => Ok(Value::from(count)),
                    Replacement::Evaluated(value) => Ok(value),
                }
            }
            Instruction::Store(token) => {
                self.persist(&token);
                Ok(Value::Null)
            }
        }
    }

    fn persist(&self, store_token: &str) {
        if let Err(e) = self.storage.save(store_token) {
            tracing::warn!(error = %e, "Failed to persist store token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ExpressionHost, MemoryStorage};
    use crate::protocol::{ContentPatch, PropertyPatch, Reference, ReplyStatus};
    use crate::token::{TokenCodec, TokenPurpose};
    use serde_json::json;

    fn dispatcher(html: &str) -> (Dispatcher, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let engine = SyncEngine::parse(html).with_script_host(ExpressionHost::new());
        (Dispatcher::new(engine, storage.clone()), storage)
    }

    fn call(instruction: Instruction) -> InstructionEnvelope {
        instruction.into_envelope(Some(Reference::new())).unwrap()
    }

    #[test]
    fn test_eval_replies_with_value() {
        let (mut dispatcher, _) = dispatcher("");
        let envelope = call(Instruction::Eval("2 + 2".to_string()));

        let reply = dispatcher.handle(&envelope).unwrap();
        assert_eq!(Some(reply.reference), envelope.reference);
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.result, json!(4));
    }

    #[test]
    fn test_eval_error_becomes_error_reply() {
        let (mut dispatcher, _) = dispatcher("");
        let reply = dispatcher
            .handle(&call(Instruction::Eval("undefinedFn()".to_string())))
            .unwrap();
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.result, json!("undefinedFn is not defined"));
    }

    #[test]
    fn test_deeply_nested_eval_becomes_error_reply() {
        let (mut dispatcher, _) = dispatcher("");
        let code = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let reply = dispatcher.handle(&call(Instruction::Eval(code))).unwrap();
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.result, json!("SyntaxError: Maximum nesting depth exceeded"));
    }

    #[test]
    fn test_unknown_command_becomes_error_reply() {
        let (mut dispatcher, _) = dispatcher("");
        let envelope = InstructionEnvelope {
            reference: Some(Reference::new()),
            command: "teleport".to_string(),
            payload: json!({}),
        };

        let reply = dispatcher.handle(&envelope).unwrap();
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.result, json!("unknown command 'teleport'"));
    }

    #[test]
    fn test_fire_and_forget_never_replies() {
        let (mut dispatcher, _) = dispatcher("");
        let ok = Instruction::Exec("1".to_string()).into_envelope(None).unwrap();
        let failing = Instruction::Exec("nope()".to_string()).into_envelope(None).unwrap();
        assert!(dispatcher.handle(&ok).is_none());
        assert!(dispatcher.handle(&failing).is_none());
    }

    #[test]
    fn test_dom_instructions() {
        let (mut dispatcher, _) = dispatcher(r#"<ul data-ampere="list"><li data-ampere="item">a</li></ul>"#);

        let set = dispatcher
            .handle(&call(Instruction::SetProperty(PropertyPatch::new(
                "item",
                "style.color",
                json!("red"),
            ))))
            .unwrap();
        assert_eq!(set.result, json!(1));

        let replaced = dispatcher
            .handle(&call(Instruction::ReplaceContent(ContentPatch::new(
                "list",
                r#"<li data-ampere="item">b</li>"#,
            ))))
            .unwrap();
        assert_eq!(replaced.result, json!(1));

        let read = dispatcher
            .handle(&call(Instruction::GetProperty(crate::protocol::PropertyQuery {
                ampere: "item".to_string(),
                path: "style.color".to_string(),
                partial: None,
            })))
            .unwrap();
        assert_eq!(read.result, json!("red"));
    }

    #[test]
    fn test_store_tokens_are_persisted() {
        let codec = TokenCodec::new(b"secret");
        let mut values = KeyValues::new();
        values.insert("theme".to_string(), json!("dark"));
        let store_token = codec.sign(TokenPurpose::Store, &values).unwrap();
        let session_token = codec.sign(TokenPurpose::Session, &KeyValues::new()).unwrap();

        let (mut dispatcher, storage) = dispatcher("");
        dispatcher.attached(&session_token, &session_token);
        assert!(dispatcher.store().is_empty());

        let fired = Instruction::Store(store_token.clone()).into_envelope(None).unwrap();
        assert!(dispatcher.handle(&fired).is_none());
        assert_eq!(storage.load().unwrap(), Some(store_token));
        assert_eq!(dispatcher.store().get("theme"), Some(&json!("dark")));
        assert!(dispatcher.session().is_empty());
    }
}
