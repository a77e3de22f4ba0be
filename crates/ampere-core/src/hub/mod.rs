//! Server-side connection hub
//!
//! The [`Hub`] is what server code talks to. It ties together the
//! connection registry, the call correlator, broadcast fan-out and the token
//! codec, and drives the connection lifecycle:
//!
//! 1. `attach` registers a connection, restores its store from the client's
//!    token and computes the session snapshot
//! 2. `call` / `fire` / `broadcast` push instructions
//! 3. `handle_reply` resolves pending calls
//! 4. `disconnect` deregisters and cancels outstanding calls
//!
//! Every operation takes the [`ConnectionContext`] returned by `attach`.
//!
//! ## Usage
//!
//! ```ignore
//! let (hub, mut events) = Hub::new(codec, HubSettings::default());
//! while let Some(HubEvent::Attached(ctx)) = events.recv().await {
//!     let value = hub.call(&ctx, Instruction::Eval("2 + 2".into())).await;
//! }
//! ```

mod broadcast;
mod correlation;
mod error;
mod registry;
mod session;
mod topic;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

pub use broadcast::Accepted;
pub use correlation::{Correlator, Dispatch};
pub use error::{HubError, RegistryError};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use session::{NoSession, SessionProvider, StaticSession};
pub use topic::{canonical_route, Topic};

use crate::config::{Config, DEFAULT_CALL_TIMEOUT_MS};
use crate::error::{CallError, CallOutcome};
use crate::protocol::{ConnectionId, Instruction, ReplyEnvelope, ServerMessage};
use crate::token::{TokenCodec, TokenPurpose};
use crate::KeyValues;

/// One attached client
///
/// Passed to every hub operation that targets a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    id: ConnectionId,
    page: String,
    topic: Topic,
}

impl ConnectionContext {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Route the client attached with
    pub fn page(&self) -> &str {
        &self.page
    }

    /// Default broadcast topic (the page topic)
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// Lifecycle notifications for the application
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Client attached and can receive instructions
    Attached(ConnectionContext),
    /// Connection is gone
    Detached(ConnectionId),
}

/// Hub settings
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Timeout for `call`
    pub call_timeout: Duration,
    /// Session keys exposed to clients
    pub session_whitelist: Vec<String>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            session_whitelist: Vec::new(),
        }
    }
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            session_whitelist: config.session_whitelist.clone(),
        }
    }
}

struct HubInner {
    registry: ConnectionRegistry,
    correlator: Correlator,
    codec: TokenCodec,
    sessions: Box<dyn SessionProvider>,
    settings: HubSettings,
    events: mpsc::UnboundedSender<HubEvent>,
}

/// Shared handle to the connection hub
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub with no session provider
    ///
    /// Returns the hub and the receiver for lifecycle events.
    pub fn new(codec: TokenCodec, settings: HubSettings) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        Self::with_sessions(codec, settings, NoSession)
    }

    /// Create a hub with a session provider
    pub fn with_sessions<S: SessionProvider + 'static>(
        codec: TokenCodec,
        settings: HubSettings,
        sessions: S,
    ) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let hub = Self {
            inner: Arc::new(HubInner {
                registry: ConnectionRegistry::new(),
                correlator: Correlator::new(),
                codec,
                sessions: Box::new(sessions),
                settings,
                events,
            }),
        };
        (hub, events_rx)
    }

    /// Register a client that sent `attach`
    ///
    /// The store is restored from `store_token` when it verifies; any token
    /// failure yields an empty store. The `attached` acknowledgement is queued
    /// on the handle before the `Attached` event is emitted, so it is always
    /// the first message the client sees.
    pub fn attach(
        &self,
        handle: ConnectionHandle,
        page: &str,
        store_token: Option<&str>,
    ) -> Result<ConnectionContext, HubError> {
        let ctx = ConnectionContext {
            id: ConnectionId::new(),
            page: page.to_string(),
            topic: Topic::for_page(page),
        };
        let inner = &self.inner;

        inner
            .registry
            .register(ctx.id, handle.clone(), ctx.topic.clone())?;

        let restored: KeyValues = store_token
            .map(|token| inner.codec.verify_or_empty(TokenPurpose::Store, token))
            .unwrap_or_default();
        let restored_keys = restored.len();
        inner.registry.update_store(&ctx.id, restored)?;

        let ambient = inner.sessions.ambient_session(page);
        let session = inner
            .registry
            .attach_session(&ctx.id, &ambient, &inner.settings.session_whitelist)?;

        let store = inner.registry.get_store(&ctx.id)?;
        let attached = ServerMessage::Attached {
            connection: ctx.id,
            store_token: inner.codec.sign(TokenPurpose::Store, &*store)?,
            session_token: inner.codec.sign(TokenPurpose::Session, &*session)?,
        };

        if handle.send(attached).is_err() {
            self.disconnect(&ctx.id);
            return Err(RegistryError::Closed(ctx.id).into());
        }

        tracing::info!(
            connection = %ctx.id,
            topic = %ctx.topic,
            restored_keys = restored_keys,
            session_keys = session.len(),
            "Connection attached"
        );

        let _ = inner.events.send(HubEvent::Attached(ctx.clone()));
        Ok(ctx)
    }

    /// Tear down a connection
    ///
    /// Pending calls on it resolve to `ConnectionClosed` right away.
    pub fn disconnect(&self, id: &ConnectionId) {
        let inner = &self.inner;
        if !inner.registry.deregister(id) {
            return;
        }

        let cancelled = inner.correlator.cancel_connection(id);
        tracing::info!(connection = %id, cancelled_calls = cancelled, "Connection detached");
        let _ = inner.events.send(HubEvent::Detached(*id));
    }

    /// Deliver a reply received from a client
    pub fn handle_reply(&self, from: &ConnectionId, reply: ReplyEnvelope) -> bool {
        self.inner.correlator.resolve(*from, reply)
    }

    /// Call with the configured default timeout
    pub async fn call(&self, ctx: &ConnectionContext, instruction: Instruction) -> CallOutcome {
        self.call_with_timeout(ctx, instruction, self.inner.settings.call_timeout)
            .await
    }

    /// Call with an explicit timeout
    pub async fn call_with_timeout(
        &self,
        ctx: &ConnectionContext,
        instruction: Instruction,
        timeout: Duration,
    ) -> CallOutcome {
        let inner = &self.inner;
        inner
            .correlator
            .call(&inner.registry, ctx.id, instruction, timeout)
            .await
    }

    /// Call and fail on anything but an `ok` reply
    pub async fn call_or_fail(
        &self,
        ctx: &ConnectionContext,
        instruction: Instruction,
    ) -> Result<Value, CallError> {
        self.call(ctx, instruction).await.into_result()
    }

    /// Send without waiting for a reply
    pub fn fire(&self, ctx: &ConnectionContext, instruction: Instruction) -> Dispatch {
        let inner = &self.inner;
        inner.correlator.fire(&inner.registry, ctx.id, instruction)
    }

    /// Send to every connection on `topic`
    pub fn broadcast(&self, topic: &Topic, instruction: Instruction) -> Accepted {
        broadcast::broadcast(&self.inner.registry, topic, instruction)
    }

    /// Send to every connection viewing the same page as `ctx`
    pub fn broadcast_page(&self, ctx: &ConnectionContext, instruction: Instruction) -> Accepted {
        self.broadcast(&ctx.topic, instruction)
    }

    /// Subscribe a connection to an additional topic
    pub fn subscribe(&self, ctx: &ConnectionContext, topic: Topic) -> Result<(), RegistryError> {
        self.inner.registry.subscribe(&ctx.id, topic)
    }

    /// Drop a topic subscription
    pub fn unsubscribe(&self, ctx: &ConnectionContext, topic: &Topic) -> Result<(), RegistryError> {
        self.inner.registry.unsubscribe(&ctx.id, topic)
    }

    /// Whole store of a connection
    pub fn store(&self, ctx: &ConnectionContext) -> Result<Arc<KeyValues>, RegistryError> {
        self.inner.registry.get_store(&ctx.id)
    }

    /// One store value
    pub fn store_get(&self, ctx: &ConnectionContext, key: &str) -> Result<Option<Value>, RegistryError> {
        Ok(self.store(ctx)?.get(key).cloned())
    }

    /// Set a store value and push the re-signed token to the client
    pub fn store_put(
        &self,
        ctx: &ConnectionContext,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Dispatch, HubError> {
        let key = key.into();
        self.modify_store(ctx, |store| {
            store.insert(key, value);
        })
    }

    /// Remove a store value and push the re-signed token to the client
    pub fn store_remove(&self, ctx: &ConnectionContext, key: &str) -> Result<Dispatch, HubError> {
        self.modify_store(ctx, |store| {
            store.remove(key);
        })
    }

    /// Read-only session snapshot
    pub fn session(&self, ctx: &ConnectionContext) -> Result<Arc<KeyValues>, RegistryError> {
        self.inner.registry.session(&ctx.id)
    }

    /// Identities subscribed to `topic`
    pub fn broadcast_group(&self, topic: &Topic) -> Vec<ConnectionId> {
        self.inner.registry.broadcast_group(topic)
    }

    /// Number of attached connections
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of calls waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Default call timeout
    pub fn call_timeout(&self) -> Duration {
        self.inner.settings.call_timeout
    }

    /// Mutate the store and queue its token while the entry is locked
    ///
    /// Tokens reach the client in the order the writes happened, so the last
    /// one it persists always matches the server-side store.
    fn modify_store<F>(&self, ctx: &ConnectionContext, modify: F) -> Result<Dispatch, HubError>
    where
        F: FnOnce(&mut KeyValues),
    {
        let codec = &self.inner.codec;
        let publish = |store: &KeyValues, handle: &ConnectionHandle| -> Result<Dispatch, HubError> {
            let token = codec.sign(TokenPurpose::Store, store)?;
            let envelope = Instruction::Store(token).into_envelope(None)?;
            Ok(match handle.send(ServerMessage::Instruction(envelope)) {
                Ok(()) => Dispatch::Dispatched,
                Err(_) => Dispatch::NotDelivered,
            })
        };
        let (_, dispatch) = self.inner.registry.modify_store(&ctx.id, modify, publish)?;

        let dispatch = dispatch?;
        if dispatch == Dispatch::NotDelivered {
            tracing::debug!(connection = %ctx.id, "Store token not delivered");
        }
        Ok(dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InstructionEnvelope;
    use crate::token;
    use serde_json::json;

    fn hub_with_session() -> (Hub, mpsc::UnboundedReceiver<HubEvent>) {
        let mut ambient = KeyValues::new();
        ambient.insert("user_id".to_string(), json!(7));
        ambient.insert("secret".to_string(), json!("nope"));
        let settings = HubSettings {
            call_timeout: Duration::from_millis(200),
            session_whitelist: vec!["user_id".to_string()],
        };
        Hub::with_sessions(TokenCodec::new(b"hub-secret"), settings, StaticSession::new(ambient))
    }

    fn attached_tokens(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> (ConnectionId, String, String) {
        match rx.try_recv() {
            Ok(ServerMessage::Attached {
                connection,
                store_token,
                session_token,
            }) => (connection, store_token, session_token),
            other => panic!("Expected attached, got {:?}", other),
        }
    }

    fn next_instruction(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> InstructionEnvelope {
        match rx.try_recv() {
            Ok(ServerMessage::Instruction(envelope)) => envelope,
            other => panic!("Expected instruction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attach_sends_tokens_and_event() {
        let (hub, mut events) = hub_with_session();
        let (handle, mut rx) = ConnectionHandle::channel();

        let ctx = hub.attach(handle, "/Todo/", None).unwrap();
        assert_eq!(ctx.topic(), &Topic::for_page("/todo"));
        assert_eq!(ctx.page(), "/Todo/");

        let (id, store_token, session_token) = attached_tokens(&mut rx);
        assert_eq!(id, ctx.id());
        let store: KeyValues = token::inspect(&store_token).unwrap();
        assert!(store.is_empty());
        let session: KeyValues = token::inspect(&session_token).unwrap();
        assert_eq!(session.get("user_id"), Some(&json!(7)));
        assert!(session.get("secret").is_none());

        assert!(matches!(events.recv().await, Some(HubEvent::Attached(c)) if c == ctx));
    }

    #[tokio::test]
    async fn test_store_round_trip_across_reconnect() {
        let (hub, _events) = hub_with_session();
        let (handle, mut rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();
        let _ = attached_tokens(&mut rx);

        hub.store_put(&ctx, "theme", json!("dark")).unwrap();
        let envelope = next_instruction(&mut rx);
        let token = match Instruction::from_envelope(&envelope).unwrap() {
            Instruction::Store(token) => token,
            other => panic!("Expected store instruction, got {:?}", other),
        };
        assert_eq!(hub.store_get(&ctx, "theme").unwrap(), Some(json!("dark")));

        hub.disconnect(&ctx.id());
        assert!(hub.store(&ctx).is_err());

        // Reconnect presenting the persisted token
        let (handle, mut rx) = ConnectionHandle::channel();
        let again = hub.attach(handle, "/", Some(&token)).unwrap();
        assert_ne!(again.id(), ctx.id());
        assert_eq!(hub.store_get(&again, "theme").unwrap(), Some(json!("dark")));
        let (_, store_token, _) = attached_tokens(&mut rx);
        let restored: KeyValues = token::inspect(&store_token).unwrap();
        assert_eq!(restored.get("theme"), Some(&json!("dark")));
    }

    #[tokio::test]
    async fn test_bad_store_token_degrades_to_empty() {
        let (hub, _events) = hub_with_session();

        // A session token presented as a store token is rejected
        let (handle, mut rx) = ConnectionHandle::channel();
        let _first = hub.attach(handle, "/", None).unwrap();
        let (_, _, session_token) = attached_tokens(&mut rx);

        let (handle, _rx) = ConnectionHandle::channel();
        let other = hub.attach(handle, "/", Some(&session_token)).unwrap();
        assert!(hub.store(&other).unwrap().is_empty());

        let (handle, _rx) = ConnectionHandle::channel();
        let garbage = hub.attach(handle, "/", Some("garbage")).unwrap();
        assert!(hub.store(&garbage).unwrap().is_empty());
        assert_eq!(hub.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_store_remove() {
        let (hub, _events) = hub_with_session();
        let (handle, _rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();

        hub.store_put(&ctx, "a", json!(1)).unwrap();
        hub.store_put(&ctx, "b", json!(2)).unwrap();
        hub.store_remove(&ctx, "a").unwrap();

        let store = hub.store(&ctx).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_concurrent_puts_deliver_tokens_in_write_order() {
        let (hub, _events) = hub_with_session();
        let (handle, mut rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();
        let _ = attached_tokens(&mut rx);

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let (hub, ctx) = (&hub, &ctx);
                scope.spawn(move || {
                    for i in 0..50 {
                        let key = format!("w{}-{}", worker, i);
                        assert_eq!(hub.store_put(ctx, key, json!(i)).unwrap(), Dispatch::Dispatched);
                    }
                });
            }
        });

        let mut last = None;
        let mut previous_len = 0;
        while let Ok(ServerMessage::Instruction(envelope)) = rx.try_recv() {
            let token = match Instruction::from_envelope(&envelope).unwrap() {
                Instruction::Store(token) => token,
                other => panic!("Expected store instruction, got {:?}", other),
            };
            let values: KeyValues = token::inspect(&token).unwrap();
            // Every put adds a key, so queued tokens only ever grow
            assert_eq!(values.len(), previous_len + 1);
            previous_len = values.len();
            last = Some(values);
        }

        let last = last.expect("store tokens were pushed");
        assert_eq!(last.len(), 400);
        assert_eq!(&last, &*hub.store(&ctx).unwrap());
    }

    #[tokio::test]
    async fn test_call_through_hub() {
        let (hub, _events) = hub_with_session();
        let (handle, mut rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();
        let _ = rx.recv().await;

        let caller = {
            let hub = hub.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { hub.call_or_fail(&ctx, Instruction::Eval("2 + 2".to_string())).await })
        };

        let envelope = match rx.recv().await {
            Some(ServerMessage::Instruction(envelope)) => envelope,
            other => panic!("Expected instruction, got {:?}", other),
        };
        assert!(hub.handle_reply(&ctx.id(), ReplyEnvelope::ok(envelope.reference.unwrap(), json!(4))));
        assert_eq!(caller.await.unwrap(), Ok(json!(4)));
    }

    #[tokio::test]
    async fn test_call_times_out_with_default() {
        let (hub, _events) = hub_with_session();
        let (handle, _rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();

        let err = hub
            .call_or_fail(&ctx, Instruction::Eval("1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, CallError::Timeout { millis: 200 });
        assert_eq!(err.to_string(), "timed out after 200 ms.");
    }

    #[tokio::test]
    async fn test_disconnect_cancels_calls_and_emits_event() {
        let (hub, mut events) = hub_with_session();
        let (handle, mut rx) = ConnectionHandle::channel();
        let ctx = hub.attach(handle, "/", None).unwrap();
        let _ = rx.recv().await;
        let _ = events.recv().await;

        let caller = {
            let hub = hub.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                hub.call_with_timeout(&ctx, Instruction::Eval("1".to_string()), Duration::from_secs(30))
                    .await
            })
        };
        let _ = rx.recv().await;
        assert_eq!(hub.pending_calls(), 1);

        hub.disconnect(&ctx.id());
        assert_eq!(caller.await.unwrap(), CallOutcome::ConnectionClosed);
        assert!(matches!(events.recv().await, Some(HubEvent::Detached(id)) if id == ctx.id()));

        // Second disconnect is a no-op
        hub.disconnect(&ctx.id());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_page() {
        let (hub, _events) = hub_with_session();
        let (h1, mut rx1) = ConnectionHandle::channel();
        let (h2, mut rx2) = ConnectionHandle::channel();
        let (h3, mut rx3) = ConnectionHandle::channel();
        let a = hub.attach(h1, "/board", None).unwrap();
        let _b = hub.attach(h2, "/board?x=1", None).unwrap();
        let _c = hub.attach(h3, "/elsewhere", None).unwrap();
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let _ = attached_tokens(rx);
        }

        assert_eq!(hub.broadcast_page(&a, Instruction::Exec("ping()".to_string())), Accepted);
        assert_eq!(next_instruction(&mut rx1).command, "exec");
        assert_eq!(next_instruction(&mut rx2).command, "exec");
        assert!(rx3.try_recv().is_err());
        assert_eq!(hub.broadcast_group(a.topic()).len(), 2);
    }

    #[tokio::test]
    async fn test_attach_on_closed_transport() {
        let (hub, _events) = hub_with_session();
        let (handle, rx) = ConnectionHandle::channel();
        drop(rx);
        assert!(matches!(
            hub.attach(handle, "/", None),
            Err(HubError::Registry(RegistryError::Closed(_)))
        ));
        assert_eq!(hub.connection_count(), 0);
    }
}
