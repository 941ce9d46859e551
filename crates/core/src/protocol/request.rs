use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body (`Content-Length` bytes after the blank line).
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse an RTSP request head from its text representation.
    ///
    /// Expects the request line, headers, and trailing blank line. The body,
    /// if any, is attached separately with [`with_body`](Self::with_body).
    /// Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyRequest))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 || !parts[2].starts_with("RTSP/") {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line
                .find(':')
                .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: Vec::new(),
        })
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// CSeq as a number.
    pub fn cseq_number(&self) -> Result<u32> {
        let raw = self
            .cseq()
            .ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?;
        raw.parse()
            .map_err(|_| RtspError::parse(ParseErrorKind::InvalidCSeq(raw.to_string())))
    }

    /// `Content-Length` value; zero when absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.get_header("Content-Length") {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| RtspError::parse(ParseErrorKind::InvalidContentLength)),
        }
    }

    /// Session ID from the `Session` header, without the `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

/// Best-effort CSeq extraction from a request that failed to parse, so the
/// error response can still echo it.
pub fn sniff_cseq(raw: &str) -> Option<&str> {
    raw.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("CSeq")
            .then(|| value.trim())
    })
}
