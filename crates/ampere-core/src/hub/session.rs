//! Session snapshots
//!
//! The ambient session (whatever the surrounding web stack keeps for a user)
//! is filtered through a whitelist once, at attach time. Clients get a signed,
//! read-only copy; there is no way to write it back.

use crate::KeyValues;

/// Source of ambient session data for an attaching client
pub trait SessionProvider: Send + Sync {
    /// Full ambient session for a client attaching on `page`
    fn ambient_session(&self, page: &str) -> KeyValues;
}

/// Provider with no session data
#[derive(Debug, Default, Clone)]
pub struct NoSession;

impl SessionProvider for NoSession {
    fn ambient_session(&self, _page: &str) -> KeyValues {
        KeyValues::new()
    }
}

/// Provider returning the same session for everyone
#[derive(Debug, Default, Clone)]
pub struct StaticSession {
    values: KeyValues,
}

impl StaticSession {
    pub fn new(values: KeyValues) -> Self {
        Self { values }
    }
}

impl SessionProvider for StaticSession {
    fn ambient_session(&self, _page: &str) -> KeyValues {
        self.values.clone()
    }
}

/// Keep only whitelisted keys
pub fn whitelist(ambient: &KeyValues, keys: &[String]) -> KeyValues {
    ambient
        .iter()
        .filter(|(key, _)| keys.iter().any(|allowed| allowed == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
