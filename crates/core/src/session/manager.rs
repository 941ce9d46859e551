use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{Delivered, Session, SessionState};
use crate::error::{Result, RtspError};

/// Server-wide traffic totals.
#[derive(Debug, Default)]
pub struct TrafficTotals {
    pub bytes_sent: AtomicU64,
    pub packets_sent: AtomicU64,
    pub frames_pushed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub sessions_evicted: AtomicU64,
}

/// Thread-safe session registry.
///
/// `sessions` holds every live session (Init through Paused) and is what
/// counts toward `max_clients`. `connections` holds every open control
/// connection, including ones whose session was torn down by TEARDOWN,
/// so that server stop can close them all.
///
/// Clone is cheap (Arc-wrapped).
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    connections: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    totals: Arc<TrafficTotals>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session unless the registry already holds `max` sessions.
    ///
    /// Check and insert happen under one write lock, so concurrent accepts
    /// can never exceed the limit.
    pub fn try_insert(&self, session: Arc<Session>, max: usize) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= max {
            return Err(RtspError::CapacityReached { max });
        }
        tracing::debug!(session_id = %session.id, peer = %session.peer_addr(), "session registered");
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// All live sessions.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Live sessions currently in the Playing state.
    pub fn playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state() == SessionState::Playing)
            .cloned()
            .collect()
    }

    pub fn register_connection(&self, session: Arc<Session>) {
        self.connections.lock().insert(session.id.clone(), session);
    }

    pub fn unregister_connection(&self, id: &str) {
        self.connections.lock().remove(id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Remove a session from the registry and release its transport.
    ///
    /// The entry is removed before teardown so the registry never holds a
    /// session whose resources are gone. Returns whether it was registered.
    pub fn release(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                session.teardown();
                true
            }
            None => false,
        }
    }

    /// Forcibly end a session: unregister it, close its control connection
    /// and release its transport.
    pub fn evict(&self, id: &str, reason: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        session.close_connection();
        session.teardown();
        self.totals.sessions_evicted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session_id = %id,
            peer = %session.peer_addr(),
            reason,
            "session evicted"
        );
        true
    }

    /// Evict every session idle for longer than `timeout`. Returns the count.
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<(String, Duration)> = self
            .sessions
            .read()
            .values()
            .filter_map(|s| {
                let idle = s.idle();
                (idle > timeout).then(|| (s.id.clone(), idle))
            })
            .collect();

        let mut evicted = 0;
        for (id, idle) in idle {
            tracing::debug!(session_id = %id, idle_secs = idle.as_secs(), "session idle past timeout");
            if self.evict(&id, "idle timeout") {
                evicted += 1;
            }
        }
        evicted
    }

    /// Evict all sessions and close every open control connection.
    pub fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.evict(&id, "server stopping");
        }
        let connections: Vec<Arc<Session>> = self.connections.lock().drain().map(|(_, s)| s).collect();
        for session in connections {
            session.close_connection();
            session.teardown();
        }
    }

    pub fn totals(&self) -> &TrafficTotals {
        &self.totals
    }

    pub(crate) fn record_delivery(&self, delivered: Delivered) {
        self.totals
            .packets_sent
            .fetch_add(delivered.packets, Ordering::Relaxed);
        self.totals
            .bytes_sent
            .fetch_add(delivered.bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_pushed(&self) {
        self.totals.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_dropped(&self) {
        self.totals.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_session;

    #[test]
    fn insert_respects_capacity() {
        let manager = SessionManager::new();
        let (a, _pa) = test_session();
        let (b, _pb) = test_session();
        let (c, _pc) = test_session();
        manager.try_insert(a.clone(), 2).unwrap();
        manager.try_insert(b, 2).unwrap();
        assert!(matches!(
            manager.try_insert(c.clone(), 2),
            Err(RtspError::CapacityReached { max: 2 })
        ));
        assert!(!manager.contains(&c.id));

        assert!(manager.release(&a.id));
        manager.try_insert(c, 2).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn release_tears_down_and_unregisters() {
        let manager = SessionManager::new();
        let (session, _peer) = test_session();
        manager.try_insert(session.clone(), 4).unwrap();
        assert!(manager.release(&session.id));
        assert!(manager.get(&session.id).is_none());
        assert_eq!(session.state(), SessionState::TornDown);
        assert!(!manager.release(&session.id));
    }

    #[test]
    fn evict_idle_only_removes_stale_sessions() {
        let manager = SessionManager::new();
        let (stale, _p1) = test_session();
        let (fresh, _p2) = test_session();
        manager.try_insert(stale.clone(), 4).unwrap();
        manager.try_insert(fresh.clone(), 4).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        fresh.touch();

        assert_eq!(manager.evict_idle(Duration::from_millis(40)), 1);
        assert!(!manager.contains(&stale.id));
        assert!(manager.contains(&fresh.id));
        assert_eq!(stale.state(), SessionState::TornDown);
        assert_eq!(manager.totals().sessions_evicted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn playing_sessions_filters_by_state() {
        let manager = SessionManager::new();
        let (a, _pa) = test_session();
        let (b, _pb) = test_session();
        manager.try_insert(a.clone(), 4).unwrap();
        manager.try_insert(b.clone(), 4).unwrap();
        a.set_state(SessionState::Playing);
        b.set_state(SessionState::Paused);
        let playing = manager.playing_sessions();
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].id, a.id);
    }

    #[test]
    fn shutdown_all_closes_connections() {
        let manager = SessionManager::new();
        let (session, _peer) = test_session();
        manager.try_insert(session.clone(), 4).unwrap();
        manager.register_connection(session.clone());
        manager.shutdown_all();
        assert!(manager.is_empty());
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(session.state(), SessionState::TornDown);
    }
}
