use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct BroadcastSession {
    opened_at: Instant,
}

/// Per-admin broadcast sessions with explicit open/cancel/expiry transitions.
/// An opened session means "the next private message from this admin is the
/// broadcast payload".
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<i64, BroadcastSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            inner: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn open_broadcast(&self, admin_id: i64) {
        self.inner.insert(
            admin_id,
            BroadcastSession {
                opened_at: Instant::now(),
            },
        );
    }

    /// Returns true if a session was open.
    pub fn cancel(&self, admin_id: i64) -> bool {
        self.inner.remove(&admin_id).is_some()
    }

    /// Consumes the session. Returns true only when one was open and still
    /// within its lifetime; an expired session is dropped and reported closed.
    pub fn take_broadcast(&self, admin_id: i64) -> bool {
        match self.inner.remove(&admin_id) {
            Some((_, session)) => session.opened_at.elapsed() < self.ttl,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_take() {
        let sessions = SessionStore::new(Duration::from_secs(600));

        assert!(!sessions.take_broadcast(1));
        sessions.open_broadcast(1);
        assert!(sessions.take_broadcast(1));
        // Consumed.
        assert!(!sessions.take_broadcast(1));
    }

    #[test]
    fn cancel_closes_session() {
        let sessions = SessionStore::new(Duration::from_secs(600));

        sessions.open_broadcast(1);
        assert!(sessions.cancel(1));
        assert!(!sessions.cancel(1));
        assert!(!sessions.take_broadcast(1));
    }

    #[test]
    fn expired_session_is_closed() {
        let sessions = SessionStore::new(Duration::ZERO);

        sessions.open_broadcast(1);
        assert!(!sessions.take_broadcast(1));
    }

    #[test]
    fn sessions_are_per_admin() {
        let sessions = SessionStore::new(Duration::from_secs(600));

        sessions.open_broadcast(1);
        sessions.open_broadcast(2);
        assert!(sessions.take_broadcast(1));
        assert!(sessions.take_broadcast(2));
    }
}
