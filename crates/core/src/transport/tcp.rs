use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::interleaved;
use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::request::sniff_cseq;
use crate::protocol::{MethodHandler, RtspRequest, RtspResponse};
use crate::server::ServerContext;
use crate::session::{Session, SessionState};

/// Request line plus headers may not exceed this many bytes.
const MAX_HEAD_LEN: usize = 16 * 1024;
/// Request bodies may not exceed this many bytes.
const MAX_BODY_LEN: usize = 64 * 1024;
/// How long an over-capacity client gets to send its first request.
const REJECT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared write half of an RTSP control connection.
///
/// RTSP responses and interleaved RTP frames share the same socket; the
/// mutex keeps each write whole. Writes block at most the configured
/// write timeout.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    writer: Arc<Mutex<TcpStream>>,
    raw: Arc<TcpStream>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl ControlChannel {
    pub fn new(stream: &TcpStream, write_timeout: Duration) -> io::Result<Self> {
        stream.set_write_timeout(Some(write_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(stream.try_clone()?)),
            raw: Arc::new(stream.try_clone()?),
            peer_addr: stream.peer_addr()?,
            local_addr: stream.local_addr()?,
        })
    }

    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(bytes)?;
        writer.flush()
    }

    pub fn send_response(&self, response: &RtspResponse) -> io::Result<()> {
        self.write_all(response.serialize().as_bytes())
    }

    /// Shut down both directions, waking a blocked reader.
    pub fn shutdown(&self) {
        let _ = self.raw.shutdown(Shutdown::Both);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(listener: TcpListener, ctx: ServerContext) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rtsp-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, ctx));
                if let Err(e) = spawned {
                    tracing::warn!(%peer_addr, error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// One message read off the control connection.
enum Message {
    /// RTSP request line and headers, up to and including the blank line.
    Head(String),
    /// An interleaved `$` frame from the client (RTCP receiver reports);
    /// consumed and discarded.
    Interleaved { channel: u8, len: usize },
    TooLarge,
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    session: Arc<Session>,
    handler: MethodHandler,
    ctx: ServerContext,
}

impl Connection {
    /// Entry point: register a session for the connection and run its
    /// request loop, or turn it away with 503 when the server is full.
    fn handle(stream: TcpStream, ctx: ServerContext) {
        let control = match ControlChannel::new(&stream, ctx.config.write_timeout) {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(error = %e, "failed to configure control connection");
                return;
            }
        };
        let peer_addr = control.peer_addr();
        let session = Arc::new(Session::new(control.clone(), ctx.config.idle_timeout));

        if let Err(e) = ctx
            .sessions
            .try_insert(session.clone(), ctx.config.max_clients)
        {
            tracing::warn!(%peer_addr, error = %e, "rejecting client");
            reject(stream, &control, &e);
            return;
        }
        ctx.sessions.register_connection(session.clone());

        tracing::info!(%peer_addr, session_id = %session.id, "client connected");

        let handler = MethodHandler::new(session.clone(), ctx.clone());
        let mut conn = Connection {
            reader: BufReader::new(stream),
            session,
            handler,
            ctx,
        };

        let reason = conn.run();
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self) -> &'static str {
        while self.ctx.running.load(Ordering::SeqCst) {
            let message = match read_message(&mut self.reader) {
                Ok(Some(message)) => message,
                Ok(None) => return "connection closed by client",
                Err(_) => return "read error",
            };

            let head = match message {
                Message::Head(head) => head,
                Message::Interleaved { channel, len } => {
                    tracing::trace!(session_id = %self.session.id, channel, len, "interleaved input");
                    self.session.touch();
                    continue;
                }
                Message::TooLarge => {
                    let error = RtspError::parse(ParseErrorKind::RequestTooLarge);
                    let _ = self
                        .session
                        .control()
                        .send_response(&RtspResponse::from_error(&error));
                    return "request too large";
                }
            };

            if head.trim().is_empty() {
                continue;
            }

            let mut framing_lost = false;
            let response = match self.read_request(&head) {
                Ok(request) => {
                    tracing::debug!(
                        session_id = %self.session.id,
                        method = %request.method,
                        uri = %request.uri,
                        cseq = request.cseq().unwrap_or("-"),
                        "request"
                    );
                    self.handler.handle(&request)
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session.id, error = %e, "bad request");
                    self.session.touch();
                    // The unread body would be parsed as the next request.
                    framing_lost = declares_body(&head);
                    RtspResponse::from_error(&e).with_cseq(sniff_cseq(&head))
                }
            };

            tracing::debug!(
                session_id = %self.session.id,
                status = response.status_code,
                "response"
            );

            if self.session.control().send_response(&response).is_err() {
                return "write error";
            }
            if framing_lost {
                return "unreadable request body";
            }
            if self.session.state() == SessionState::TornDown {
                return "session torn down";
            }
        }

        "server shutting down"
    }

    /// Parse the request head and read its body, if any.
    fn read_request(&mut self, head: &str) -> crate::Result<RtspRequest> {
        let request = RtspRequest::parse(head)?;
        let len = request.content_length()?;
        if len == 0 {
            return Ok(request);
        }
        if len > MAX_BODY_LEN {
            return Err(RtspError::parse(ParseErrorKind::RequestTooLarge));
        }
        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body)?;
        Ok(request.with_body(body))
    }

    /// Release this connection's session and forget the connection.
    fn cleanup(&self) {
        let id = &self.session.id;
        if self.ctx.sessions.release(id) {
            tracing::debug!(session_id = %id, "released session on disconnect");
        }
        self.session.teardown();
        self.ctx.sessions.unregister_connection(id);
        self.session.close_connection();
    }
}

/// Read the next RTSP request head or interleaved frame.
///
/// Returns `Ok(None)` at end of stream.
fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Message>> {
    let first = match reader.fill_buf()?.first() {
        Some(&byte) => byte,
        None => return Ok(None),
    };

    if first == interleaved::MAGIC {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header)?;
        let Some((channel, len)) = interleaved::decode_header(header) else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad interleaved header"));
        };
        io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        return Ok(Some(Message::Interleaved { channel, len }));
    }

    let mut head = Vec::new();
    loop {
        let start = head.len();
        if reader.read_until(b'\n', &mut head)? == 0 {
            return Ok(None);
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            break;
        }
        if head.len() > MAX_HEAD_LEN {
            return Ok(Some(Message::TooLarge));
        }
    }
    Ok(Some(Message::Head(String::from_utf8_lossy(&head).into_owned())))
}

/// True if the head carries a `Content-Length` other than zero.
fn declares_body(head: &str) -> bool {
    head.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("Content-Length") && value.trim() != "0"
        })
    })
}

/// Answer an over-capacity client's first request with 503 and close.
fn reject(stream: TcpStream, control: &ControlChannel, error: &RtspError) {
    let _ = stream.set_read_timeout(Some(REJECT_READ_TIMEOUT));
    let mut reader = BufReader::new(stream);
    let cseq = match read_message(&mut reader) {
        Ok(Some(Message::Head(head))) => sniff_cseq(&head).map(str::to_string),
        _ => None,
    };
    let response = RtspResponse::from_error(error).with_cseq(cseq.as_deref());
    let _ = control.send_response(&response);
    control.shutdown();
}
