use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use uuid::Uuid;

use super::intent::Intent;

/// An intent awaiting the user's yes/no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub intent: Intent,
    pub parameter: Option<String>,
}

struct Entry {
    pending: PendingIntent,
    stored_at: Instant,
}

/// Server-side, per-session storage for pending intents.
///
/// Each session holds at most one entry. `take` is the only way to read an
/// entry and it always removes it, so a confirmation can be consumed once.
/// Entries older than the TTL are treated as absent.
pub struct PendingIntentStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl PendingIntentStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `pending` for `session`, replacing any previous entry.
    pub fn put(&self, session: Uuid, pending: PendingIntent) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        entries.insert(
            session,
            Entry {
                pending,
                stored_at: now,
            },
        );
    }

    pub fn take(&self, session: Uuid) -> Option<PendingIntent> {
        let entry = self.entries.lock().remove(&session)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.pending)
        } else {
            tracing::debug!("Pending intent for session {} expired", session);
            None
        }
    }

    /// Drops the session's entry. Returns whether one was present.
    pub fn discard(&self, session: Uuid) -> bool {
        self.entries.lock().remove(&session).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(parameter: &str) -> PendingIntent {
        PendingIntent {
            intent: Intent::AddToCart,
            parameter: Some(parameter.to_string()),
        }
    }

    #[test]
    fn take_consumes_the_entry() {
        let store = PendingIntentStore::new(Duration::from_secs(60));
        let session = Uuid::new_v4();

        store.put(session, add("auriculares"));

        assert_eq!(store.take(session), Some(add("auriculares")));
        assert_eq!(store.take(session), None);
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = PendingIntentStore::new(Duration::from_secs(60));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.put(alice, add("laptop"));

        assert_eq!(store.take(bob), None);
        assert_eq!(store.take(alice), Some(add("laptop")));
    }

    #[test]
    fn put_replaces_previous_entry() {
        let store = PendingIntentStore::new(Duration::from_secs(60));
        let session = Uuid::new_v4();

        store.put(session, add("laptop"));
        store.put(session, add("mouse"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.take(session), Some(add("mouse")));
    }

    #[test]
    fn expired_entries_are_absent() {
        let store = PendingIntentStore::new(Duration::ZERO);
        let session = Uuid::new_v4();

        store.put(session, add("laptop"));

        assert_eq!(store.take(session), None);
    }

    #[test]
    fn discard_reports_presence() {
        let store = PendingIntentStore::new(Duration::from_secs(60));
        let session = Uuid::new_v4();

        assert!(!store.discard(session));
        store.put(session, add("laptop"));
        assert!(store.discard(session));
        assert!(store.is_empty());
    }
}
