//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): the RTSP control connection. One TCP connection per
//!   client, with a thread per connection. Its write half is shared so that
//!   responses and interleaved RTP never interleave mid-frame.
//!
//! - **UDP** ([`udp`]): RTP as datagrams to the client's negotiated port,
//!   from a socket owned by the session.
//!
//! - **Interleaved** ([`interleaved`]): RTP framed inside the control
//!   connection with a 4-byte `$` header (RFC 2326 §10.12).
//!
//! A session picks one of the media transports at SETUP and owns it until
//! teardown; dropping the [`Transport`] releases its socket.

pub mod interleaved;
pub mod tcp;
pub mod udp;

use std::fmt;

use crate::error::Result;
pub use interleaved::InterleavedTransport;
pub use tcp::ControlChannel;
pub use udp::UdpTransport;

/// Media transport negotiated for one session.
#[derive(Debug)]
pub enum Transport {
    Udp(UdpTransport),
    Interleaved(InterleavedTransport),
}

/// Which kind of transport a session uses, for stats and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Interleaved,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Udp => "udp",
            TransportKind::Interleaved => "tcp-interleaved",
        })
    }
}

impl Transport {
    /// Send one serialized RTP packet. Returns bytes handed to the socket;
    /// a UDP datagram dropped because the socket buffer is full counts as 0.
    pub fn send(&self, packet: &[u8]) -> Result<usize> {
        match self {
            Transport::Udp(udp) => udp.send(packet),
            Transport::Interleaved(tcp) => tcp.send(packet),
        }
    }

    /// Whether a successful send proves the client is still reading.
    ///
    /// Interleaved writes complete only once the peer's TCP stack accepts
    /// them within the write timeout. UDP datagrams are fire-and-forget.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Transport::Interleaved(_))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Udp(_) => TransportKind::Udp,
            Transport::Interleaved(_) => TransportKind::Interleaved,
        }
    }

    /// `Transport` header value for the SETUP response (RFC 2326 §12.39).
    pub fn response_header(&self, ssrc: u32) -> String {
        match self {
            Transport::Udp(udp) => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={:08X}",
                udp.client_rtp_port(),
                udp.client_rtcp_port(),
                udp.server_rtp_port(),
                udp.server_rtp_port().wrapping_add(1),
                ssrc
            ),
            Transport::Interleaved(tcp) => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{};ssrc={:08X}",
                tcp.rtp_channel(),
                tcp.rtcp_channel(),
                ssrc
            ),
        }
    }
}
