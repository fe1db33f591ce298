//! Login-session binding.
//!
//! On successful passkey verification the caller receives an opaque session
//! id bound to the user's custom id; subsequent requests identify the user
//! through that binding, not through the credential again. Sessions are
//! process-local and expire after a TTL; logout removes them eagerly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug)]
struct SessionEntry {
    custom_id: String,
    created_at: Instant,
}

/// Opaque session-id to user binding with amortized TTL cleanup.
pub struct SessionStore {
    entries: Mutex<HashMap<Uuid, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Bind a fresh session to the given user, sweeping expired sessions.
    pub fn create(&self, custom_id: &str) -> Uuid {
        let session_id = Uuid::new_v4();
        let now = Instant::now();

        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);
        entries.insert(
            session_id,
            SessionEntry {
                custom_id: custom_id.to_string(),
                created_at: now,
            },
        );

        session_id
    }

    /// Resolve a session to its user's custom id.
    pub fn get(&self, session_id: &Uuid) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(session_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.custom_id.clone())
    }

    /// Clear a session. Returns whether it existed.
    pub fn remove(&self, session_id: &Uuid) -> bool {
        self.entries.lock().unwrap().remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_resolve() {
        let store = SessionStore::new(Duration::from_secs(3600));
        let session_id = store.create("user-1");

        assert_eq!(store.get(&session_id), Some("user-1".to_string()));
        assert_eq!(store.get(&Uuid::new_v4()), None);
    }

    #[test]
    fn test_logout_clears_binding() {
        let store = SessionStore::new(Duration::from_secs(3600));
        let session_id = store.create("user-1");

        assert!(store.remove(&session_id));
        assert_eq!(store.get(&session_id), None);
        assert!(!store.remove(&session_id));
    }

    #[test]
    fn test_expired_session_not_resolved() {
        let store = SessionStore::new(Duration::ZERO);
        let session_id = store.create("user-1");
        assert_eq!(store.get(&session_id), None);
    }
}
