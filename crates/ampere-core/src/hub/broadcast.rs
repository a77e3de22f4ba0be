//! Broadcast fan-out
//!
//! Fire-and-forget delivery to every member of a topic. Per-connection
//! failures are logged and otherwise ignored; the caller only learns that
//! the broadcast was accepted.

use super::registry::ConnectionRegistry;
use super::topic::Topic;
use crate::protocol::{Instruction, ServerMessage};

/// Uniform result of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

/// Send `instruction` to every connection subscribed to `topic`
pub fn broadcast(registry: &ConnectionRegistry, topic: &Topic, instruction: Instruction) -> Accepted {
    let envelope = match instruction.into_envelope(None) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Failed to encode broadcast");
            return Accepted;
        }
    };

    let members = registry.members(topic);
    let mut undelivered = 0usize;
    for (id, handle) in &members {
        if handle
            .send(ServerMessage::Instruction(envelope.clone()))
            .is_err()
        {
            undelivered += 1;
            tracing::trace!(connection = %id, topic = %topic, "Broadcast not delivered");
        }
    }

    tracing::debug!(
        topic = %topic,
        command = %envelope.command,
        recipients = members.len(),
        undelivered = undelivered,
        "Broadcast sent"
    );

    Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::registry::ConnectionHandle;
    use crate::protocol::ConnectionId;

    #[test]
    fn test_broadcast_reaches_topic_members_only() {
        let registry = ConnectionRegistry::new();

        let mut receivers = Vec::new();
        for page in ["/todo", "/todo/", "/done"] {
            let (handle, rx) = ConnectionHandle::channel();
            registry
                .register(ConnectionId::new(), handle, Topic::for_page(page))
                .unwrap();
            receivers.push(rx);
        }

        let accepted = broadcast(
            &registry,
            &Topic::for_page("/todo"),
            Instruction::Exec("refresh()".to_string()),
        );
        assert_eq!(accepted, Accepted);

        for rx in receivers.iter_mut().take(2) {
            match rx.try_recv() {
                Ok(ServerMessage::Instruction(envelope)) => {
                    assert!(envelope.reference.is_none());
                    assert_eq!(envelope.command, "exec");
                }
                other => panic!("Expected instruction, got {:?}", other),
            }
        }
        assert!(receivers[2].try_recv().is_err());
    }

    #[test]
    fn test_broadcast_ignores_closed_members() {
        let registry = ConnectionRegistry::new();
        let (closed, rx) = ConnectionHandle::channel();
        drop(rx);
        registry
            .register(ConnectionId::new(), closed, Topic::named("all"))
            .unwrap();
        let (open, mut rx_open) = ConnectionHandle::channel();
        registry
            .register(ConnectionId::new(), open, Topic::named("all"))
            .unwrap();

        assert_eq!(
            broadcast(&registry, &Topic::named("all"), Instruction::Exec("x".to_string())),
            Accepted
        );
        assert!(rx_open.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_to_empty_topic() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            broadcast(&registry, &Topic::named("nobody"), Instruction::Exec("x".to_string())),
            Accepted
        );
    }
}
