//! Point-in-time snapshots of server and session activity.

use std::net::SocketAddr;
use std::time::Duration;

use crate::session::SessionState;
use crate::transport::TransportKind;

/// Per-session counters as of the moment [`Server::stats`](crate::Server::stats)
/// was called.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    /// `None` until SETUP completes.
    pub transport: Option<TransportKind>,
    pub age: Duration,
    pub idle: Duration,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub frames_sent: u64,
}

/// Server-wide snapshot.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub running: bool,
    pub local_addr: Option<SocketAddr>,
    /// Registered sessions, counted against the client limit.
    pub active_sessions: usize,
    pub playing_sessions: usize,
    pub open_connections: usize,
    pub frames_pushed: u64,
    /// Access units skipped for a session because its queue was full.
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub sessions_evicted: u64,
    pub sessions: Vec<SessionStats>,
}

impl ServerStats {
    /// Sessions in a given state.
    pub fn count_in_state(&self, state: SessionState) -> usize {
        self.sessions.iter().filter(|s| s.state == state).count()
    }
}
