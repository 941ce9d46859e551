//! Server and stream configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::Codec;
use crate::media::h264::DEFAULT_MTU;

pub const DEFAULT_PORT: u16 = 8554;
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Parameters of the encoded stream the server publishes.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate, advertised as `a=framerate`.
    pub framerate: Option<u32>,
    /// RTP clock rate in Hz (90 kHz for video).
    pub clock_rate: u32,
    /// Dynamic RTP payload type (96–127).
    pub payload_type: u8,
    /// Maximum RTP payload size in bytes.
    pub mtu: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            width: 1920,
            height: 1080,
            framerate: Some(30),
            clock_rate: 90_000,
            payload_type: 96,
            mtu: DEFAULT_MTU,
        }
    }
}

impl StreamConfig {
    pub fn new(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            ..Default::default()
        }
    }
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTSP control listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client sessions; further connections get 503.
    pub max_clients: usize,
    /// Sessions idle longer than this are torn down by the sweep.
    pub idle_timeout: Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
    /// Bound on a blocking TCP write (responses and interleaved RTP).
    pub write_timeout: Duration,
    /// Access units buffered per session before new ones are dropped.
    pub queue_depth: usize,
    /// Reject requests whose CSeq skips ahead instead of only rejecting
    /// non-increasing ones.
    pub strict_cseq: bool,
    /// Path the stream is published under (e.g. `/stream`).
    pub stream_path: String,
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_clients: 8,
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            queue_depth: 8,
            strict_cseq: false,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Camera".to_string(),
            stream: StreamConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Listen on all interfaces at `port` with the given client ceiling.
    pub fn with_port(port: u16, max_clients: usize) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            max_clients,
            ..Default::default()
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn stream_path(mut self, path: &str) -> Self {
        self.stream_path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn public_host(mut self, host: &str) -> Self {
        self.public_host = Some(host.to_string());
        self
    }

    pub fn strict_cseq(mut self, strict: bool) -> Self {
        self.strict_cseq = strict;
        self
    }

    /// Check everything that would otherwise fail later at request time.
    pub fn validate(&self) -> Result<()> {
        self.stream.codec.encoding_name()?;
        if self.max_clients == 0 {
            return Err(RtspError::InvalidConfig("max_clients must be at least 1".into()));
        }
        if !(96..=127).contains(&self.stream.payload_type) {
            return Err(RtspError::InvalidConfig(format!(
                "payload type {} is not dynamic (96-127)",
                self.stream.payload_type
            )));
        }
        if self.stream.clock_rate == 0 {
            return Err(RtspError::InvalidConfig("clock rate must be non-zero".into()));
        }
        if self.stream.mtu < 64 {
            return Err(RtspError::InvalidConfig(format!(
                "MTU {} is too small",
                self.stream.mtu
            )));
        }
        if self.queue_depth == 0 {
            return Err(RtspError::InvalidConfig("queue depth must be at least 1".into()));
        }
        if self.sweep_interval.is_zero() || self.idle_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(RtspError::InvalidConfig(
                "timeouts and sweep interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8554);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.stream.mtu, 1400);
        config.validate().unwrap();
    }

    #[test]
    fn mjpeg_rejected_at_validation() {
        let config = ServerConfig::default().stream(StreamConfig::new(Codec::Mjpeg, 640, 480));
        assert!(matches!(
            config.validate(),
            Err(RtspError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn zero_clients_rejected() {
        assert!(ServerConfig::with_port(8554, 0).validate().is_err());
    }

    #[test]
    fn stream_path_gets_leading_slash() {
        assert_eq!(ServerConfig::default().stream_path("cam").stream_path, "/cam");
    }
}
