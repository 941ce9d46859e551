use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::media::AccessUnit;
use crate::mount::Mount;
use crate::session::{Dispatch, SessionManager, SessionState};
use crate::stats::ServerStats;
use crate::transport::tcp;

/// Granularity at which the eviction thread notices shutdown.
const EVICTION_TICK: Duration = Duration::from_millis(100);

/// State shared by the accept loop, connection threads and the sweeper.
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub sessions: SessionManager,
    pub mount: Arc<Mount>,
    pub config: Arc<ServerConfig>,
    pub running: Arc<AtomicBool>,
}

impl ServerContext {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self {
            sessions: SessionManager::new(),
            mount: Arc::new(Mount::new(&config.stream_path, config.stream.clone())),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct Runtime {
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

/// High-level RTSP server orchestrator.
///
/// Owns the session registry and the published stream. Delegates TCP
/// connection handling to [`transport::tcp`](crate::transport::tcp) and
/// fans access units out to each playing session's delivery queue.
///
/// All methods take `&self`; wrap the server in an `Arc` to push frames
/// from an encoder thread.
pub struct Server {
    ctx: ServerContext,
    runtime: Mutex<Option<Runtime>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: ServerContext::new(config),
            runtime: Mutex::new(None),
        }
    }

    /// Bind the listener and start the accept and eviction threads.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(RtspError::AlreadyRunning);
        }
        self.ctx.config.validate()?;

        let listener = TcpListener::bind(self.ctx.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.ctx.running.store(true, Ordering::SeqCst);

        let accept_ctx = self.ctx.clone();
        let accept = thread::Builder::new()
            .name("rtsp-accept".into())
            .spawn(move || tcp::accept_loop(listener, accept_ctx));
        let eviction_ctx = self.ctx.clone();
        let eviction = thread::Builder::new()
            .name("rtsp-evict".into())
            .spawn(move || eviction_loop(eviction_ctx));

        let threads = match (accept, eviction) {
            (Ok(accept), Ok(eviction)) => vec![accept, eviction],
            (accept, eviction) => {
                self.ctx.running.store(false, Ordering::SeqCst);
                for handle in [accept, eviction].into_iter().flatten() {
                    let _ = handle.join();
                }
                return Err(RtspError::Io(std::io::Error::other(
                    "failed to spawn server threads",
                )));
            }
        };

        tracing::info!(
            addr = %local_addr,
            path = %self.ctx.mount.path(),
            codec = %self.ctx.config.stream.codec,
            max_clients = self.ctx.config.max_clients,
            "RTSP server listening"
        );

        *runtime = Some(Runtime {
            local_addr,
            threads,
        });
        Ok(())
    }

    /// Stop accepting, end every session, close every connection and join
    /// the server threads. A no-op when not running.
    pub fn stop(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        tracing::info!("server stopping");

        self.ctx.running.store(false, Ordering::SeqCst);
        self.ctx.sessions.shutdown_all();
        for handle in runtime.threads {
            if handle.join().is_err() {
                tracing::error!("server thread panicked");
            }
        }

        tracing::info!(addr = %runtime.local_addr, "server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().as_ref().map(|r| r.local_addr)
    }

    /// Publish one access unit to every playing session.
    ///
    /// Never blocks on a client: each session gets the frame through its
    /// bounded queue, and a full queue drops the frame for that session
    /// only. Returns the number of sessions the frame was queued for.
    pub fn push_frame(&self, access_unit: AccessUnit) -> Result<usize> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }

        self.ctx.mount.observe(&access_unit);
        self.ctx.sessions.record_frame_pushed();

        let access_unit = Arc::new(access_unit);
        let mut queued = 0;
        for session in self.ctx.sessions.playing_sessions() {
            match session.enqueue(access_unit.clone()) {
                Dispatch::Queued => queued += 1,
                Dispatch::Dropped => {
                    self.ctx.sessions.record_frame_dropped();
                    tracing::debug!(session_id = %session.id, "delivery queue full, frame dropped");
                }
                Dispatch::NotPlaying => {}
                Dispatch::Closed => {
                    self.ctx.sessions.evict(&session.id, "delivery worker gone");
                }
            }
        }
        Ok(queued)
    }

    pub fn stats(&self) -> ServerStats {
        let sessions: Vec<_> = self
            .ctx
            .sessions
            .snapshot()
            .iter()
            .map(|s| s.stats())
            .collect();
        let totals = self.ctx.sessions.totals();
        ServerStats {
            running: self.is_running(),
            local_addr: self.local_addr(),
            active_sessions: sessions.len(),
            playing_sessions: sessions
                .iter()
                .filter(|s| s.state == SessionState::Playing)
                .count(),
            open_connections: self.ctx.sessions.connection_count(),
            frames_pushed: totals.frames_pushed.load(Ordering::Relaxed),
            frames_dropped: totals.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: totals.bytes_sent.load(Ordering::Relaxed),
            packets_sent: totals.packets_sent.load(Ordering::Relaxed),
            sessions_evicted: totals.sessions_evicted.load(Ordering::Relaxed),
            sessions,
        }
    }

    pub fn mount(&self) -> &Mount {
        &self.ctx.mount
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Periodically evict sessions idle past the configured timeout.
fn eviction_loop(ctx: ServerContext) {
    let interval = ctx.config.sweep_interval;
    let tick = interval.min(EVICTION_TICK);
    let mut last_sweep = Instant::now();

    while ctx.running.load(Ordering::SeqCst) {
        thread::sleep(tick);
        if last_sweep.elapsed() < interval {
            continue;
        }
        last_sweep = Instant::now();
        let evicted = ctx.sessions.evict_idle(ctx.config.idle_timeout);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = ctx.sessions.len(), "idle sweep");
        }
    }
    tracing::debug!("eviction loop exited");
}
