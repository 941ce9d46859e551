use std::sync::Arc;
use std::sync::mpsc::sync_channel;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::packetizer_for;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, SessionDescription};
use crate::server::ServerContext;
use crate::session::{MediaPipeline, Session, SessionState, TransportSpec, delivery};
use crate::transport::{InterleavedTransport, Transport, UdpTransport};

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// Handles RTSP method requests for a single TCP connection.
///
/// Drives the connection's [`Session`] through its state machine. Every
/// request refreshes the session's activity time and must carry a CSeq
/// greater than the previous one.
pub struct MethodHandler {
    session: Arc<Session>,
    ctx: ServerContext,
}

impl MethodHandler {
    pub(crate) fn new(session: Arc<Session>, ctx: ServerContext) -> Self {
        MethodHandler { session, ctx }
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        self.session.touch();
        let cseq = request.cseq();

        let result = self.check_cseq(request).and_then(|()| {
            match request.method.as_str() {
                "OPTIONS" => self.handle_options(cseq),
                "DESCRIBE" => self.handle_describe(cseq, &request.uri),
                "SETUP" => self.handle_setup(cseq, request),
                "PLAY" => self.handle_play(cseq, request),
                "PAUSE" => self.handle_pause(cseq, request),
                "TEARDOWN" => self.handle_teardown(cseq, request),
                "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
                other => Err(RtspError::MethodNotImplemented(other.to_string())),
            }
        });

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session.id,
                    method = %request.method,
                    cseq = cseq.unwrap_or("-"),
                    error = %e,
                    "request failed"
                );
                let response = RtspResponse::from_error(&e).with_cseq(cseq);
                match e {
                    RtspError::MethodNotValidInState { state, .. } => {
                        response.add_header("Allow", state.allowed_methods())
                    }
                    RtspError::MethodNotImplemented(_) => response.add_header("Public", PUBLIC_METHODS),
                    _ => response,
                }
            }
        }
    }

    fn check_cseq(&self, request: &RtspRequest) -> Result<()> {
        let cseq = request.cseq_number()?;
        self.session.check_cseq(cseq, self.ctx.config.strict_cseq)
    }

    fn handle_options(&self, cseq: Option<&str>) -> Result<RtspResponse> {
        tracing::debug!(session_id = %self.session.id, "OPTIONS");
        Ok(RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Public", PUBLIC_METHODS))
    }

    /// Host for the SDP origin and connection lines: the configured public
    /// host, else the host the client addressed, else our local address.
    fn sdp_host(&self, uri: &str) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let authority = after_scheme.split('/').next().unwrap_or("");
            let authority = authority.rsplit('@').next().unwrap_or(authority);
            let host = match authority.strip_prefix('[') {
                Some(v6) => v6.split(']').next().unwrap_or(""),
                None => authority.split(':').next().unwrap_or(""),
            };
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.session.control().local_addr().ip().to_string()
    }

    fn handle_describe(&self, cseq: Option<&str>, uri: &str) -> Result<RtspResponse> {
        tracing::debug!(session_id = %self.session.id, uri, "DESCRIBE");

        let mount = &self.ctx.mount;
        if !mount.matches(uri) {
            return Err(RtspError::StreamNotFound(uri.to_string()));
        }

        let config = &self.ctx.config;
        let host = self.sdp_host(uri);
        let parameter_sets = mount.parameter_sets();
        let sdp = sdp::generate_sdp(&SessionDescription {
            stream: mount.stream(),
            parameter_sets: &parameter_sets,
            host: &host,
            username: &config.sdp_username,
            session_id: &config.sdp_session_id,
            session_version: &config.sdp_session_version,
            session_name: &config.sdp_session_name,
        })?;

        let content_base = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{uri}/")
        };

        Ok(RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base)
            .with_body(sdp))
    }

    fn handle_setup(&mut self, cseq: Option<&str>, request: &RtspRequest) -> Result<RtspResponse> {
        if !self.ctx.mount.matches(&request.uri) {
            return Err(RtspError::StreamNotFound(request.uri.clone()));
        }

        let state = self.session.state();
        if !matches!(state, SessionState::Init | SessionState::Ready) {
            return Err(self.invalid_in_state("SETUP", state));
        }
        if let Some(id) = request.session_id()
            && id != self.session.id
        {
            return Err(RtspError::SessionNotFound(id.to_string()));
        }

        let transport_header = request
            .get_header("Transport")
            .ok_or(RtspError::parse(ParseErrorKind::MissingHeader("Transport")))?;
        let spec = TransportSpec::parse(transport_header)?;

        let transport = match spec {
            TransportSpec::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => Transport::Udp(UdpTransport::bind(
                self.session.control().local_addr().ip(),
                self.session.peer_addr().ip(),
                client_rtp_port,
                client_rtcp_port,
            )?),
            TransportSpec::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => Transport::Interleaved(InterleavedTransport::new(
                self.session.control().clone(),
                rtp_channel,
                rtcp_channel,
            )),
        };
        let packetizer = packetizer_for(self.ctx.mount.stream())?;
        let transport_response = transport.response_header(packetizer.ssrc());
        let kind = transport.kind();

        let (queue, worker_queue) = sync_channel(self.ctx.config.queue_depth);
        delivery::spawn_worker(self.session.clone(), self.ctx.sessions.clone(), worker_queue)?;

        let pipeline = MediaPipeline {
            transport,
            packetizer,
            uri: request.uri.clone(),
        };
        if !self.session.install_media(pipeline, queue) {
            return Err(self.invalid_in_state("SETUP", SessionState::TornDown));
        }

        tracing::info!(
            session_id = %self.session.id,
            peer = %self.session.peer_addr(),
            uri = %request.uri,
            transport = %kind,
            "session set up"
        );

        Ok(RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &self.session.session_header_value()))
    }

    fn handle_play(&mut self, cseq: Option<&str>, request: &RtspRequest) -> Result<RtspResponse> {
        let state = self.session.state();
        if !matches!(state, SessionState::Ready | SessionState::Paused) {
            return Err(self.invalid_in_state("PLAY", state));
        }
        self.require_session(request)?;

        let last_pts = self.ctx.mount.last_pts();
        let rtp_info = self
            .session
            .with_media(|media| {
                format!(
                    "url={};seq={};rtptime={}",
                    media.uri,
                    media.packetizer.next_sequence(),
                    media.packetizer.rtp_timestamp(last_pts)
                )
            })
            .ok_or_else(|| self.invalid_in_state("PLAY", state))?;

        self.session.set_state(SessionState::Playing);
        tracing::info!(session_id = %self.session.id, "session started playing");

        Ok(RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Session", &self.session.session_header_value())
            .add_header("Range", "npt=0.000-")
            .add_header("RTP-Info", &rtp_info))
    }

    fn handle_pause(&mut self, cseq: Option<&str>, request: &RtspRequest) -> Result<RtspResponse> {
        let state = self.session.state();
        if state != SessionState::Playing {
            return Err(self.invalid_in_state("PAUSE", state));
        }
        self.require_session(request)?;

        self.session.set_state(SessionState::Paused);
        tracing::info!(session_id = %self.session.id, "session paused");
        Ok(RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Session", &self.session.session_header_value()))
    }

    /// Ends the session. The connection closes once this reply is written;
    /// a repeat that arrives first is a harmless no-op.
    fn handle_teardown(&mut self, cseq: Option<&str>, request: &RtspRequest) -> Result<RtspResponse> {
        if let Some(id) = request.session_id()
            && id != self.session.id
        {
            return Err(RtspError::SessionNotFound(id.to_string()));
        }

        if self.session.state() == SessionState::TornDown {
            tracing::debug!(session_id = %self.session.id, "TEARDOWN on torn-down session");
            return Ok(RtspResponse::ok().with_cseq(cseq));
        }

        self.ctx.sessions.release(&self.session.id);
        self.session.teardown();
        tracing::info!(session_id = %self.session.id, "session terminated via TEARDOWN");
        Ok(RtspResponse::ok().with_cseq(cseq))
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: Option<&str>, request: &RtspRequest) -> Result<RtspResponse> {
        tracing::trace!(session_id = %self.session.id, "GET_PARAMETER keepalive");

        let response = RtspResponse::ok().with_cseq(cseq);
        match request.session_id() {
            Some(id) if id == self.session.id => {
                Ok(response.add_header("Session", &self.session.session_header_value()))
            }
            Some(id) => Err(RtspError::SessionNotFound(id.to_string())),
            None => Ok(response),
        }
    }

    /// PLAY and PAUSE must name this connection's session.
    fn require_session(&self, request: &RtspRequest) -> Result<()> {
        match request.session_id() {
            Some(id) if id == self.session.id => Ok(()),
            Some(id) => Err(RtspError::SessionNotFound(id.to_string())),
            None => Err(RtspError::parse(ParseErrorKind::MissingHeader("Session"))),
        }
    }

    fn invalid_in_state(&self, method: &str, state: SessionState) -> RtspError {
        RtspError::MethodNotValidInState {
            method: method.to_string(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StreamConfig};
    use crate::media::{AccessUnit, Codec};
    use crate::testutil::{test_context, test_session};
    use std::net::UdpSocket;
    use std::time::Duration;

    struct Harness {
        handler: MethodHandler,
        session: Arc<Session>,
        ctx: ServerContext,
        cseq: u32,
        _peer: std::net::TcpStream,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(ServerConfig::default())
        }

        fn with_config(config: ServerConfig) -> Self {
            let ctx = test_context(config);
            let (session, peer) = test_session();
            ctx.sessions.try_insert(session.clone(), 8).unwrap();
            Harness {
                handler: MethodHandler::new(session.clone(), ctx.clone()),
                session,
                ctx,
                cseq: 0,
                _peer: peer,
            }
        }

        fn send(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> RtspResponse {
            self.cseq += 1;
            let mut raw = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
            for (name, value) in headers {
                raw.push_str(&format!("{name}: {value}\r\n"));
            }
            raw.push_str("\r\n");
            let request = RtspRequest::parse(&raw).unwrap();
            self.handler.handle(&request)
        }

        fn setup_udp(&mut self, client: &UdpSocket) -> RtspResponse {
            let port = client.local_addr().unwrap().port();
            let transport = format!("RTP/AVP;unicast;client_port={}-{}", port, port + 1);
            self.send(
                "SETUP",
                "rtsp://127.0.0.1:8554/stream/track1",
                &[("Transport", &transport)],
            )
        }

        fn session_header(&self) -> String {
            self.session.id.clone()
        }
    }

    #[test]
    fn options_lists_methods() {
        let mut h = Harness::new();
        let resp = h.send("OPTIONS", "*", &[]);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("CSeq"), Some("1"));
        assert!(resp.get_header("Public").unwrap().contains("GET_PARAMETER"));
    }

    #[test]
    fn describe_returns_sdp() {
        let mut h = Harness::new();
        let resp = h.send("DESCRIBE", "rtsp://10.1.2.3:8554/stream", &[]);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert_eq!(
            resp.get_header("Content-Base"),
            Some("rtsp://10.1.2.3:8554/stream/")
        );
        let body = resp.body.unwrap();
        assert!(body.contains("c=IN IP4 10.1.2.3\r\n"));
        assert!(body.contains("a=rtpmap:96 H264/90000\r\n"));
        assert_eq!(h.session.state(), SessionState::Init);
    }

    #[test]
    fn describe_includes_captured_parameter_sets() {
        let mut h = Harness::new();
        h.ctx.mount.observe(&AccessUnit::new(
            Codec::H264,
            vec![vec![0x67, 0x64, 0x00, 0x28], vec![0x68, 0xee, 0x3c, 0x80], vec![0x65, 1]],
            Duration::ZERO,
        ));
        let resp = h.send("DESCRIBE", "rtsp://10.1.2.3:8554/stream", &[]);
        assert!(resp.body.unwrap().contains("sprop-parameter-sets=Z2QAKA==,aO48gA=="));
    }

    #[test]
    fn describe_unknown_path() {
        let mut h = Harness::new();
        let resp = h.send("DESCRIBE", "rtsp://10.1.2.3:8554/other", &[]);
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn sdp_host_handles_ipv6_and_userinfo() {
        let h = Harness::new();
        assert_eq!(h.handler.sdp_host("rtsp://[::1]:8554/stream"), "::1");
        assert_eq!(h.handler.sdp_host("rtsp://user:pw@cam.local:8554/stream"), "cam.local");
        assert_eq!(h.handler.sdp_host("/stream"), "127.0.0.1");
    }

    #[test]
    fn public_host_overrides_uri() {
        let mut h = Harness::with_config(ServerConfig::default().public_host("203.0.113.5"));
        let resp = h.send("DESCRIBE", "rtsp://10.1.2.3:8554/stream", &[]);
        assert!(resp.body.unwrap().contains("c=IN IP4 203.0.113.5\r\n"));
    }

    #[test]
    fn describe_unsupported_codec_is_server_error() {
        let config = ServerConfig::default().stream(StreamConfig::new(Codec::Mjpeg, 640, 480));
        let mut h = Harness::with_config(config);
        let resp = h.send("DESCRIBE", "rtsp://10.1.2.3:8554/stream", &[]);
        assert_eq!(resp.status_code, 500);
    }

    #[test]
    fn full_udp_lifecycle() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();

        let resp = h.setup_udp(&client);
        assert_eq!(resp.status_code, 200);
        let transport = resp.get_header("Transport").unwrap();
        assert!(transport.starts_with("RTP/AVP;unicast;client_port="));
        assert!(transport.contains(";server_port="));
        assert!(transport.contains(";ssrc="));
        assert_eq!(
            resp.get_header("Session").unwrap(),
            h.session.session_header_value()
        );
        assert_eq!(h.session.state(), SessionState::Ready);

        let sid = h.session_header();
        let resp = h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Range"), Some("npt=0.000-"));
        let rtp_info = resp.get_header("RTP-Info").unwrap();
        assert!(rtp_info.starts_with("url=rtsp://127.0.0.1:8554/stream/track1;seq="));
        assert_eq!(h.session.state(), SessionState::Playing);

        let resp = h.send("PAUSE", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 200);
        assert_eq!(h.session.state(), SessionState::Paused);

        let resp = h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 200);

        let resp = h.send("TEARDOWN", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 200);
        assert_eq!(h.session.state(), SessionState::TornDown);
        assert!(!h.ctx.sessions.contains(&sid));
        assert!(h.session.with_media(|_| ()).is_none());

        let resp = h.send("TEARDOWN", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 200);
    }

    #[test]
    fn play_before_setup_is_455() {
        let mut h = Harness::new();
        let resp = h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[]);
        assert_eq!(resp.status_code, 455);
        assert!(resp.get_header("Allow").unwrap().contains("SETUP"));
        assert_eq!(h.session.state(), SessionState::Init);
    }

    #[test]
    fn pause_when_not_playing_is_455() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        h.setup_udp(&client);
        let sid = h.session_header();
        let resp = h.send("PAUSE", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 455);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[test]
    fn play_while_playing_is_455() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        h.setup_udp(&client);
        let sid = h.session_header();
        h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        let resp = h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.status_code, 455);
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn setup_while_playing_is_455() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        h.setup_udp(&client);
        let sid = h.session_header();
        h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        let resp = h.setup_udp(&client);
        assert_eq!(resp.status_code, 455);
    }

    #[test]
    fn setup_after_teardown_is_455() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        h.send("TEARDOWN", "rtsp://127.0.0.1:8554/stream", &[]);
        let resp = h.setup_udp(&client);
        assert_eq!(resp.status_code, 455);
        assert_eq!(h.session.state(), SessionState::TornDown);
    }

    #[test]
    fn setup_twice_replaces_transport() {
        let first = UdpSocket::bind("127.0.0.1:0").unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        assert_eq!(h.setup_udp(&first).status_code, 200);
        assert_eq!(h.setup_udp(&second).status_code, 200);
        let port = second.local_addr().unwrap().port();
        let dest_port = h
            .session
            .with_media(|m| match &m.transport {
                Transport::Udp(udp) => udp.client_rtp_port(),
                Transport::Interleaved(_) => 0,
            })
            .unwrap();
        assert_eq!(dest_port, port);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[test]
    fn setup_interleaved() {
        let mut h = Harness::new();
        let resp = h.send(
            "SETUP",
            "rtsp://127.0.0.1:8554/stream/track1",
            &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
        );
        assert_eq!(resp.status_code, 200);
        let transport = resp.get_header("Transport").unwrap();
        assert!(transport.starts_with("RTP/AVP/TCP;unicast;interleaved=0-1;ssrc="));
    }

    #[test]
    fn setup_transport_errors() {
        let mut h = Harness::new();
        let resp = h.send("SETUP", "rtsp://127.0.0.1:8554/stream/track1", &[]);
        assert_eq!(resp.status_code, 400);

        let resp = h.send(
            "SETUP",
            "rtsp://127.0.0.1:8554/stream/track1",
            &[("Transport", "RTP/AVP;multicast")],
        );
        assert_eq!(resp.status_code, 461);

        let resp = h.send(
            "SETUP",
            "rtsp://127.0.0.1:8554/stream/track1",
            &[("Transport", "RTP/AVP;unicast")],
        );
        assert_eq!(resp.status_code, 461);
        assert_eq!(h.session.state(), SessionState::Init);
    }

    #[test]
    fn wrong_session_id_is_454() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut h = Harness::new();
        h.setup_udp(&client);
        let resp = h.send("PLAY", "rtsp://127.0.0.1:8554/stream", &[("Session", "DEADBEEF")]);
        assert_eq!(resp.status_code, 454);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[test]
    fn cseq_rules() {
        let mut h = Harness::new();
        let request = RtspRequest::parse("OPTIONS * RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(h.handler.handle(&request).status_code, 400);

        let request = RtspRequest::parse("OPTIONS * RTSP/1.0\r\nCSeq: 5\r\n\r\n").unwrap();
        assert_eq!(h.handler.handle(&request).status_code, 200);

        let request = RtspRequest::parse("OPTIONS * RTSP/1.0\r\nCSeq: 5\r\n\r\n").unwrap();
        let resp = h.handler.handle(&request);
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.get_header("CSeq"), Some("5"));

        let request = RtspRequest::parse("OPTIONS * RTSP/1.0\r\nCSeq: abc\r\n\r\n").unwrap();
        assert_eq!(h.handler.handle(&request).status_code, 400);
    }

    #[test]
    fn unknown_method_is_501() {
        let mut h = Harness::new();
        let resp = h.send("RECORD", "rtsp://127.0.0.1:8554/stream", &[]);
        assert_eq!(resp.status_code, 501);
        assert_eq!(resp.get_header("CSeq"), Some("1"));
    }

    #[test]
    fn get_parameter_keepalive() {
        let mut h = Harness::new();
        let resp = h.send("GET_PARAMETER", "rtsp://127.0.0.1:8554/stream", &[]);
        assert_eq!(resp.status_code, 200);
        assert!(resp.get_header("Session").is_none());

        let sid = h.session_header();
        let resp = h.send("GET_PARAMETER", "rtsp://127.0.0.1:8554/stream", &[("Session", &sid)]);
        assert_eq!(resp.get_header("Session"), Some(h.session.session_header_value().as_str()));
    }
}
