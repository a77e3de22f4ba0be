//! Request/response correlation
//!
//! Each synchronous call registers a pending entry under a fresh reference,
//! sends the instruction and waits on a oneshot channel raced against its
//! own deadline. Whoever removes the entry from the pending map (a reply,
//! the timer, or connection teardown) is the one that resolves the call, so
//! every call resolves exactly once.
//!
//! ```text
//!   call()                         client
//!     │ register(ref) ──► pending
//!     │ send {ref, command} ────────►│
//!     │ wait(rx) ◄─┐                 │
//!     │            │ resolve(reply) ◄┘ {ref, status, result}
//!     │            └── pending.remove(ref)
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::registry::ConnectionRegistry;
use crate::error::{remote_error_text, CallOutcome};
use crate::protocol::{ConnectionId, Instruction, Reference, ReplyEnvelope, ReplyStatus, ServerMessage};

/// Acknowledgement for fire-and-forget dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued on the connection's transport
    Dispatched,
    /// Connection absent or closed
    NotDelivered,
}

/// Bookkeeping for one outstanding call
#[derive(Debug)]
struct PendingCall {
    connection: ConnectionId,
    waiter: oneshot::Sender<CallOutcome>,
}

/// Correlates outgoing instructions with their replies
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Reference, PendingCall>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `instruction` to `connection` and wait for the reply
    ///
    /// Resolves to `TimedOut` once `timeout` elapses without a reply, and to
    /// `ConnectionClosed` immediately if the connection is absent or goes away
    /// while waiting. Concurrent calls on one connection are independent and
    /// may resolve in any order.
    pub async fn call(
        &self,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
        instruction: Instruction,
        timeout: Duration,
    ) -> CallOutcome {
        let mut envelope = match instruction.into_envelope(None) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(connection = %connection, error = %e, "Failed to encode instruction");
                return CallOutcome::Error(e.to_string());
            }
        };

        let (waiter, mut rx) = oneshot::channel();
        let reference = self.register(connection, waiter);
        envelope.reference = Some(reference);
        let command = envelope.command.clone();

        // Registered before the lookup, so a concurrent teardown either hides
        // the handle from us or finds this entry to cancel.
        let Some(handle) = registry.handle(&connection) else {
            self.take(&reference);
            return CallOutcome::ConnectionClosed;
        };

        if handle.send(ServerMessage::Instruction(envelope)).is_err() {
            self.take(&reference);
            tracing::debug!(connection = %connection, command = %command, "Dispatch failed, connection closed");
            return CallOutcome::ConnectionClosed;
        }

        tracing::debug!(
            connection = %connection,
            reference = %reference,
            command = %command,
            timeout_ms = timeout.as_millis() as u64,
            "Call dispatched"
        );

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => CallOutcome::ConnectionClosed,
            Err(_) => {
                if self.take(&reference).is_some() {
                    tracing::debug!(
                        connection = %connection,
                        reference = %reference,
                        command = %command,
                        "Call timed out"
                    );
                    CallOutcome::TimedOut(timeout)
                } else {
                    // Resolved at the same moment the deadline fired
                    rx.try_recv().unwrap_or(CallOutcome::ConnectionClosed)
                }
            }
        }
    }

    /// Send `instruction` without waiting for anything
    pub fn fire(
        &self,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
        instruction: Instruction,
    ) -> Dispatch {
        let envelope = match instruction.into_envelope(None) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(connection = %connection, error = %e, "Failed to encode instruction");
                return Dispatch::NotDelivered;
            }
        };

        match registry.handle(&connection) {
            Some(handle) if handle.send(ServerMessage::Instruction(envelope)).is_ok() => {
                Dispatch::Dispatched
            }
            _ => Dispatch::NotDelivered,
        }
    }

    /// Resolve the pending call matching `reply`
    ///
    /// Replies with an unknown reference, or arriving on a different
    /// connection than the call was sent to, are discarded. Returns whether
    /// a call was resolved.
    pub fn resolve(&self, from: ConnectionId, reply: ReplyEnvelope) -> bool {
        let call = {
            let mut pending = self.lock();
            match pending.get(&reply.reference) {
                Some(call) if call.connection == from => pending.remove(&reply.reference),
                Some(call) => {
                    tracing::warn!(
                        reference = %reply.reference,
                        expected = %call.connection,
                        actual = %from,
                        "Reply from wrong connection discarded"
                    );
                    None
                }
                None => {
                    tracing::debug!(
                        connection = %from,
                        reference = %reply.reference,
                        "Reply without pending call discarded"
                    );
                    None
                }
            }
        };

        let Some(call) = call else {
            return false;
        };

        let outcome = match reply.status {
            ReplyStatus::Ok => CallOutcome::Ok(reply.result),
            ReplyStatus::Error => CallOutcome::Error(remote_error_text(&reply.result)),
        };

        // The caller may have been dropped; nothing to do then
        let _ = call.waiter.send(outcome);
        true
    }

    /// Resolve every pending call on `connection` as closed
    ///
    /// Returns the number of calls cancelled.
    pub fn cancel_connection(&self, connection: &ConnectionId) -> usize {
        let cancelled: Vec<PendingCall> = {
            let mut pending = self.lock();
            let references: Vec<Reference> = pending
                .iter()
                .filter(|(_, call)| call.connection == *connection)
                .map(|(reference, _)| *reference)
                .collect();
            references
                .iter()
                .filter_map(|reference| pending.remove(reference))
                .collect()
        };

        let count = cancelled.len();
        for call in cancelled {
            let _ = call.waiter.send(CallOutcome::ConnectionClosed);
        }

        if count > 0 {
            tracing::debug!(connection = %connection, cancelled = count, "Pending calls cancelled");
        }
        count
    }

    /// Number of outstanding calls
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of outstanding calls on one connection
    pub fn pending_for(&self, connection: &ConnectionId) -> usize {
        self.lock()
            .values()
            .filter(|call| call.connection == *connection)
            .count()
    }

    /// Register a waiter under a reference unused by any pending call
    fn register(&self, connection: ConnectionId, waiter: oneshot::Sender<CallOutcome>) -> Reference {
        let mut pending = self.lock();
        loop {
            let reference = Reference::new();
            if let Entry::Vacant(slot) = pending.entry(reference) {
                slot.insert(PendingCall { connection, waiter });
                return reference;
            }
        }
    }

    fn take(&self, reference: &Reference) -> Option<PendingCall> {
        self.lock().remove(reference)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Reference, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
