use crate::error::RtspError;

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = concat!("camstream-rtsp/", env!("CARGO_PKG_VERSION"));

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK, success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found: the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 400 Bad Request: malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 503 Service Unavailable, sent to connections beyond the client limit.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    /// Map a request-level error to its status line (RFC 2326 §7.1.1).
    pub fn from_error(error: &RtspError) -> Self {
        match error {
            RtspError::Parse { .. } => Self::bad_request(),
            RtspError::StreamNotFound(_) => Self::not_found(),
            RtspError::SessionNotFound(_) => Self::new(454, "Session Not Found"),
            RtspError::MethodNotValidInState { .. } => {
                Self::new(455, "Method Not Valid in This State")
            }
            RtspError::UnsupportedTransport(_) => Self::new(461, "Unsupported Transport"),
            RtspError::MethodNotImplemented(_) => Self::new(501, "Not Implemented"),
            RtspError::CapacityReached { .. } => Self::service_unavailable(),
            _ => Self::new(500, "Internal Server Error"),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Echo the request's CSeq when one is known.
    pub fn with_cseq(self, cseq: Option<&str>) -> Self {
        match cseq {
            Some(cseq) => self.add_header("CSeq", cseq),
            None => self,
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use crate::session::SessionState;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "OPTIONS");
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains(&format!("Server: {SERVER_AGENT}\r\n")));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("Public: OPTIONS\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_with_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "2")
            .with_body("v=0\r\n".to_string());
        let s = resp.serialize();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn error_status_codes() {
        let cases = [
            (RtspError::parse(ParseErrorKind::MissingCSeq), 400),
            (RtspError::StreamNotFound("/x".into()), 404),
            (RtspError::SessionNotFound("A".into()), 454),
            (
                RtspError::MethodNotValidInState {
                    method: "PLAY".into(),
                    state: SessionState::Init,
                },
                455,
            ),
            (RtspError::UnsupportedTransport("RTP/SAVP".into()), 461),
            (RtspError::MethodNotImplemented("RECORD".into()), 501),
            (RtspError::CapacityReached { max: 1 }, 503),
            (RtspError::NotStarted, 500),
        ];
        for (error, code) in cases {
            assert_eq!(RtspResponse::from_error(&error).status_code, code, "{error}");
        }
    }

    #[test]
    fn state_error_text() {
        let resp = RtspResponse::from_error(&RtspError::MethodNotValidInState {
            method: "PAUSE".into(),
            state: SessionState::Ready,
        })
        .with_cseq(Some("5"));
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 455 Method Not Valid in This State\r\n"));
        assert!(s.contains("CSeq: 5\r\n"));
    }
}
