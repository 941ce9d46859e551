//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! One [`Session`] exists per accepted control connection. It tracks:
//!
//! - An opaque session ID (hex string), revealed to the client in the
//!   `Session` header from SETUP onward.
//! - The state: Init -> Ready -> Playing <-> Paused -> TornDown.
//! - The media pipeline (transport + packetizer) negotiated during SETUP.
//! - Last-activity time, refreshed by every request, by client input on the
//!   control connection, and by frames written over interleaved TCP. UDP
//!   sends are unacknowledged and never count. The server's sweep evicts
//!   sessions idle past the configured timeout.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! accept         -> Init
//! SETUP          -> Ready
//! PLAY           -> Playing  (from Ready or Paused only)
//! PAUSE          -> Paused   (from Playing)
//! TEARDOWN       -> TornDown (idempotent)
//! disconnect / eviction / stop -> TornDown
//! ```
//!
//! The media pipeline exists only while the state is Ready, Playing or
//! Paused. Every accessor that needs it returns an explicit "not configured"
//! outcome when it is absent.

pub(crate) mod delivery;
pub mod manager;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::{AccessUnit, Packetizer};
use crate::stats::SessionStats;
use crate::transport::{ControlChannel, Transport};
pub use manager::{SessionManager, TrafficTotals};
pub use transport::TransportSpec;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no transport negotiated yet.
    Init,
    /// Transport negotiated via SETUP, no media flowing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
    /// Terminal. Transport released.
    TornDown,
}

impl SessionState {
    /// Whether a session in this state owns transport resources.
    pub fn has_transport(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Playing | SessionState::Paused
        )
    }

    /// Methods accepted in this state, for the `Allow` header of 455 replies.
    pub fn allowed_methods(self) -> &'static str {
        match self {
            SessionState::Init => "OPTIONS, DESCRIBE, SETUP, TEARDOWN, GET_PARAMETER",
            SessionState::Ready => "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER",
            SessionState::Playing => "OPTIONS, DESCRIBE, PAUSE, TEARDOWN, GET_PARAMETER",
            SessionState::Paused => "OPTIONS, DESCRIBE, PLAY, TEARDOWN, GET_PARAMETER",
            SessionState::TornDown => "OPTIONS, DESCRIBE, TEARDOWN, GET_PARAMETER",
        }
    }
}

/// Transport and packetizer created by SETUP.
pub struct MediaPipeline {
    pub transport: Transport,
    pub packetizer: Box<dyn Packetizer>,
    /// Request URI of the SETUP, echoed in `RTP-Info`.
    pub uri: String,
}

/// Outcome of handing an access unit to a session's delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queue full; the access unit was dropped for this session only.
    Dropped,
    NotPlaying,
    /// The delivery worker is gone; the session should be removed.
    Closed,
}

/// Packets and bytes written for one access unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivered {
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    frames_sent: AtomicU64,
}

/// A single RTSP session (RFC 2326 §3).
///
/// Shared between the connection thread, the delivery worker, the frame
/// fan-out and the eviction sweep. The media pipeline lock is the only lock
/// held across network I/O, and only by the delivery worker.
pub struct Session {
    /// Opaque session identifier (16-char hex string).
    pub id: String,
    control: ControlChannel,
    created_at: Instant,
    timeout: Duration,
    last_activity: Mutex<Instant>,
    state: RwLock<SessionState>,
    last_cseq: Mutex<Option<u32>>,
    media: Mutex<Option<MediaPipeline>>,
    queue: Mutex<Option<SyncSender<Arc<AccessUnit>>>>,
    counters: Counters,
}

impl Session {
    /// Create a session in the Init state for a freshly accepted connection.
    pub fn new(control: ControlChannel, timeout: Duration) -> Self {
        let now = Instant::now();
        Session {
            id: format!("{:016X}", rand::random::<u64>()),
            control,
            created_at: now,
            timeout,
            last_activity: Mutex::new(now),
            state: RwLock::new(SessionState::Init),
            last_cseq: Mutex::new(None),
            media: Mutex::new(None),
            queue: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.control.peer_addr()
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether this session is actively receiving media.
    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// Transition to a new state.
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(session_id = %self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last request, client input or acknowledged frame.
    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Accept `cseq` if it advances past the last processed request.
    ///
    /// With `strict`, it must advance by exactly one.
    pub fn check_cseq(&self, cseq: u32, strict: bool) -> Result<()> {
        let mut last = self.last_cseq.lock();
        if let Some(prev) = *last {
            let in_order = if strict {
                prev.checked_add(1) == Some(cseq)
            } else {
                cseq > prev
            };
            if !in_order {
                return Err(RtspError::parse(ParseErrorKind::OutOfOrderCSeq {
                    last: prev,
                    received: cseq,
                }));
            }
        }
        *last = Some(cseq);
        Ok(())
    }

    /// Install a new media pipeline and delivery queue and enter Ready (SETUP).
    ///
    /// A previous pipeline is dropped, which releases its socket and stops
    /// its delivery worker. Returns `false`, installing nothing, if the
    /// session was torn down concurrently.
    pub fn install_media(&self, pipeline: MediaPipeline, queue: SyncSender<Arc<AccessUnit>>) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::TornDown {
            return false;
        }
        tracing::debug!(
            session_id = %self.id,
            transport = %pipeline.transport.kind(),
            old_state = ?*state,
            new_state = ?SessionState::Ready,
            "transport configured"
        );
        *self.queue.lock() = Some(queue);
        *self.media.lock() = Some(pipeline);
        *state = SessionState::Ready;
        true
    }

    /// Read from the media pipeline, if SETUP has completed.
    pub fn with_media<R>(&self, f: impl FnOnce(&MediaPipeline) -> R) -> Option<R> {
        self.media.lock().as_ref().map(f)
    }

    /// Hand an access unit to the delivery worker without blocking.
    pub fn enqueue(&self, access_unit: Arc<AccessUnit>) -> Dispatch {
        if !self.is_playing() {
            return Dispatch::NotPlaying;
        }
        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Dispatch::NotPlaying;
        };
        match sender.try_send(access_unit) {
            Ok(()) => Dispatch::Queued,
            Err(TrySendError::Full(_)) => Dispatch::Dropped,
            Err(TrySendError::Disconnected(_)) => Dispatch::Closed,
        }
    }

    /// Packetize one access unit and write it to the transport.
    ///
    /// Called only from this session's delivery worker, so packets reach
    /// the transport in sequence-number order.
    pub fn deliver(&self, access_unit: &AccessUnit) -> Result<Delivered> {
        if !self.is_playing() {
            return Err(RtspError::SessionNotPlaying(self.id.clone()));
        }
        let mut media = self.media.lock();
        let Some(pipeline) = media.as_mut() else {
            return Err(RtspError::TransportNotConfigured(self.id.clone()));
        };

        let packets = pipeline.packetizer.packetize(access_unit)?;
        let mut delivered = Delivered::default();
        for packet in &packets {
            let sent = pipeline.transport.send(&packet.to_bytes())?;
            delivered.packets += 1;
            delivered.bytes += sent as u64;
        }
        let acknowledged = pipeline.transport.is_acknowledged();
        drop(media);

        self.counters
            .packets_sent
            .fetch_add(delivered.packets, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(delivered.bytes, Ordering::Relaxed);
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        // UDP sends succeed whether or not anyone is listening.
        if acknowledged {
            self.touch();
        }
        Ok(delivered)
    }

    /// Release the transport and enter the terminal state.
    ///
    /// Idempotent; returns `false` if the session was already torn down.
    pub fn teardown(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state == SessionState::TornDown {
                return false;
            }
            tracing::debug!(session_id = %self.id, old_state = ?*state, "tearing down");
            *state = SessionState::TornDown;
        }
        // Dropping the sender ends the delivery worker.
        self.queue.lock().take();
        self.media.lock().take();
        true
    }

    /// Close the control connection, unblocking its reader and any writer.
    pub fn close_connection(&self) {
        self.control.shutdown();
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"0000000000000001;timeout=120"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout.as_secs())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            peer_addr: self.peer_addr(),
            state: self.state(),
            transport: self.with_media(|m| m.transport.kind()),
            age: self.age(),
            idle: self.idle(),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}
