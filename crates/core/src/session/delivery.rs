//! Per-session media delivery.
//!
//! Each session that completes SETUP gets one worker thread fed by a
//! bounded queue. Frame fan-out only ever does a non-blocking `try_send`,
//! so a slow or stalled client backs up its own queue and nobody else's.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

use super::{Session, SessionManager};
use crate::error::RtspError;
use crate::media::AccessUnit;

/// Start the delivery worker for `session`.
///
/// The worker exits when the queue's sender is dropped (teardown or
/// re-SETUP) or when a transport write fails, in which case it evicts
/// the session.
pub(crate) fn spawn_worker(
    session: Arc<Session>,
    sessions: SessionManager,
    queue: Receiver<Arc<AccessUnit>>,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("rtp-{}", session.id))
        .spawn(move || run(&session, &sessions, &queue))?;
    Ok(())
}

fn run(session: &Session, sessions: &SessionManager, queue: &Receiver<Arc<AccessUnit>>) {
    tracing::debug!(session_id = %session.id, "delivery worker started");

    while let Ok(access_unit) = queue.recv() {
        match session.deliver(&access_unit) {
            Ok(delivered) => sessions.record_delivery(delivered),
            Err(RtspError::Packetize { kind }) => {
                tracing::warn!(session_id = %session.id, %kind, "access unit dropped");
            }
            Err(RtspError::SessionNotPlaying(_)) | Err(RtspError::TransportNotConfigured(_)) => {
                // Paused or torn down after the frame was queued.
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "transport write failed");
                sessions.evict(&session.id, "transport failure");
                break;
            }
        }
    }

    tracing::debug!(session_id = %session.id, "delivery worker stopped");
}
