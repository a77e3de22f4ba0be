//! Connection registry
//!
//! Maps connection identities to their outbound handle, store, session
//! snapshot and topic subscriptions.
//!
//! Locks are `std::sync::RwLock` and are never held across an await, so
//! registry operations never suspend the caller. The store is kept as an
//! `Arc<KeyValues>` that is swapped whole under the entry's write lock; a
//! reader always sees either the old or the new mapping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tokio::sync::mpsc;

use super::error::RegistryError;
use super::session;
use super::topic::Topic;
use crate::protocol::{ConnectionId, ServerMessage};
use crate::KeyValues;

/// Outbound side of a connection's message channel
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle together with the receiver the transport drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for delivery
    ///
    /// Fails only when the transport side has been dropped.
    pub fn send(&self, message: ServerMessage) -> Result<(), ServerMessage> {
        self.tx.send(message).map_err(|e| e.0)
    }
}

/// Registry entry for one connection
#[derive(Debug)]
struct ConnectionEntry {
    handle: ConnectionHandle,
    store: RwLock<Arc<KeyValues>>,
    session: OnceLock<Arc<KeyValues>>,
    topics: RwLock<HashSet<Topic>>,
}

/// Process-wide map of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with an empty store and session
    ///
    /// The connection is subscribed to `topic`. Fails if the identity is
    /// already present; reconnecting clients get a new identity.
    pub fn register(
        &self,
        id: ConnectionId,
        handle: ConnectionHandle,
        topic: Topic,
    ) -> Result<(), RegistryError> {
        let mut connections = write(&self.connections);
        if connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let mut topics = HashSet::new();
        topics.insert(topic.clone());

        connections.insert(
            id,
            Arc::new(ConnectionEntry {
                handle,
                store: RwLock::new(Arc::new(KeyValues::new())),
                session: OnceLock::new(),
                topics: RwLock::new(topics),
            }),
        );

        tracing::debug!(connection = %id, topic = %topic, "Connection registered");
        Ok(())
    }

    /// Remove a connection
    ///
    /// Returns false if it was not registered.
    pub fn deregister(&self, id: &ConnectionId) -> bool {
        let removed = write(&self.connections).remove(id).is_some();
        if removed {
            tracing::debug!(connection = %id, "Connection deregistered");
        }
        removed
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        read(&self.connections).len()
    }

    /// Outbound handle for a connection
    pub fn handle(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        read(&self.connections)
            .get(id)
            .map(|entry| entry.handle.clone())
    }

    /// Compute the session snapshot from the ambient session
    ///
    /// Only the first call computes; later calls return the stored snapshot.
    pub fn attach_session(
        &self,
        id: &ConnectionId,
        ambient: &KeyValues,
        whitelist: &[String],
    ) -> Result<Arc<KeyValues>, RegistryError> {
        let entry = self.entry(id)?;
        Ok(entry
            .session
            .get_or_init(|| Arc::new(session::whitelist(ambient, whitelist)))
            .clone())
    }

    /// Session snapshot (empty until attached)
    pub fn session(&self, id: &ConnectionId) -> Result<Arc<KeyValues>, RegistryError> {
        let entry = self.entry(id)?;
        Ok(entry.session.get().cloned().unwrap_or_default())
    }

    /// Current store mapping
    pub fn get_store(&self, id: &ConnectionId) -> Result<Arc<KeyValues>, RegistryError> {
        let entry = self.entry(id)?;
        let store = read(&entry.store).clone();
        Ok(store)
    }

    /// Replace the store mapping
    pub fn update_store(&self, id: &ConnectionId, values: KeyValues) -> Result<(), RegistryError> {
        let entry = self.entry(id)?;
        *write(&entry.store) = Arc::new(values);
        Ok(())
    }

    /// Read-modify-write the store under one lock
    ///
    /// `publish` sees the new mapping and the connection's handle before the
    /// lock is released, so anything it queues is ordered like the writes.
    pub fn modify_store<F, P, R>(
        &self,
        id: &ConnectionId,
        modify: F,
        publish: P,
    ) -> Result<(Arc<KeyValues>, R), RegistryError>
    where
        F: FnOnce(&mut KeyValues),
        P: FnOnce(&KeyValues, &ConnectionHandle) -> R,
    {
        let entry = self.entry(id)?;
        let mut store = write(&entry.store);
        let mut values = KeyValues::clone(&store);
        modify(&mut values);
        *store = Arc::new(values);
        let published = publish(&store, &entry.handle);
        Ok((store.clone(), published))
    }

    /// Add a topic subscription
    pub fn subscribe(&self, id: &ConnectionId, topic: Topic) -> Result<(), RegistryError> {
        let entry = self.entry(id)?;
        write(&entry.topics).insert(topic);
        Ok(())
    }

    /// Remove a topic subscription
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<(), RegistryError> {
        let entry = self.entry(id)?;
        write(&entry.topics).remove(topic);
        Ok(())
    }

    /// Identities subscribed to `topic`
    pub fn broadcast_group(&self, topic: &Topic) -> Vec<ConnectionId> {
        self.members(topic).into_iter().map(|(id, _)| id).collect()
    }

    /// Identities and handles subscribed to `topic`
    pub(crate) fn members(&self, topic: &Topic) -> Vec<(ConnectionId, ConnectionHandle)> {
        read(&self.connections)
            .iter()
            .filter(|(_, entry)| read(&entry.topics).contains(topic))
            .map(|(id, entry)| (*id, entry.handle.clone()))
            .collect()
    }

    fn entry(&self, id: &ConnectionId) -> Result<Arc<ConnectionEntry>, RegistryError> {
        read(&self.connections)
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
