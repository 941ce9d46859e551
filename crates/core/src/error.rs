//! Error types for the RTSP streaming core.

use std::fmt;

use crate::media::Codec;
use crate::session::SessionState;

/// Errors that can occur in the RTSP streaming core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse): malformed RTSP messages or CSeq
///   ordering violations (answered with 400).
/// - **State**: [`MethodNotValidInState`](Self::MethodNotValidInState) (455).
/// - **Transport negotiation**: [`UnsupportedTransport`](Self::UnsupportedTransport) (461).
/// - **Capacity**: [`CapacityReached`](Self::CapacityReached) (503).
/// - **Transport I/O**: [`Io`](Self::Io), [`PayloadTooLarge`](Self::PayloadTooLarge).
/// - **Packetization**: [`Packetize`](Self::Packetize): the access unit is
///   dropped for the affected session only.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`UnsupportedCodec`](Self::UnsupportedCodec).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The method is not allowed in the session's current state.
    #[error("{method} not valid in state {state:?}")]
    MethodNotValidInState {
        method: String,
        state: SessionState,
    },

    /// SETUP carried a transport spec that is missing pieces or not supported.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The client ceiling has been reached; no session was created.
    #[error("client limit reached ({max})")]
    CapacityReached { max: usize },

    /// The request URI does not name the published stream.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The `Session` header does not match this connection's session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The method is not one this server handles.
    #[error("method not implemented: {0}")]
    MethodNotImplemented(String),

    /// SETUP has not been completed for this session (no transport or packetizer).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// The access unit could not be turned into RTP packets.
    #[error("packetization failed: {kind}")]
    Packetize { kind: PacketizeErrorKind },

    /// Codec this server cannot describe or packetize.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// An interleaved frame cannot carry more than 65535 payload bytes.
    #[error("payload of {0} bytes does not fit an interleaved frame")]
    PayloadTooLarge(usize),

    /// Configuration value rejected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }

    pub(crate) fn packetize(kind: PacketizeErrorKind) -> Self {
        Self::Packetize { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a number.
    InvalidContentLength,
    /// The request headers exceeded the size limit.
    RequestTooLarge,
    /// A header the method requires is absent.
    MissingHeader(&'static str),
    /// The request carried no `CSeq` header.
    MissingCSeq,
    /// `CSeq` was not a non-negative integer.
    InvalidCSeq(String),
    /// `CSeq` did not advance past the last processed request.
    OutOfOrderCSeq { last: u32, received: u32 },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::RequestTooLarge => write!(f, "request too large"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::MissingCSeq => write!(f, "missing CSeq"),
            Self::InvalidCSeq(value) => write!(f, "invalid CSeq {value:?}"),
            Self::OutOfOrderCSeq { last, received } => {
                write!(f, "CSeq {received} out of order (last {last})")
            }
        }
    }
}

/// Specific kind of packetization failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketizeErrorKind {
    /// The access unit held no NAL units.
    EmptyAccessUnit,
    /// NAL unit at this index had zero length.
    EmptyNalUnit(usize),
    /// NAL unit at this index is shorter than the codec's NAL header.
    TruncatedNalHeader(usize),
    /// The access unit's codec differs from the session's negotiated codec.
    CodecMismatch { expected: Codec, received: Codec },
}

impl fmt::Display for PacketizeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAccessUnit => write!(f, "access unit has no NAL units"),
            Self::EmptyNalUnit(i) => write!(f, "NAL unit {i} is empty"),
            Self::TruncatedNalHeader(i) => write!(f, "NAL unit {i} is shorter than its header"),
            Self::CodecMismatch { expected, received } => {
                write!(f, "codec mismatch: expected {expected}, got {received}")
            }
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
