use std::time::Duration;

use super::pts_to_ticks;

/// Size of the RTP fixed header without CSRCs or extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// One RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub marker: bool,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Serialize header and payload into wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.push(2 << 6);
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a packet produced by [`to_bytes`](Self::to_bytes).
    ///
    /// Returns `None` for anything shorter than the fixed header or not
    /// version 2. CSRCs and extensions are not interpreted.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_LEN || buf[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            payload_type: buf[1] & 0x7f,
            marker: buf[1] & 0x80 != 0,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: buf[RTP_HEADER_LEN..].to_vec(),
        })
    }
}

/// Per-stream RTP header state shared by all codec packetizers.
///
/// Manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp base**: random offset added to the media clock, so the
///   wire timestamp is `base + pts * clock_rate`.
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    pub clock_rate: u32,
    sequence: u16,
    timestamp_base: u32,
}

impl RtpHeader {
    /// Create header state with explicit SSRC and zero sequence/timestamp base.
    pub fn new(pt: u8, ssrc: u32, clock_rate: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            clock_rate,
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            clock_rate,
            sequence: 0,
            timestamp_base: 0,
        }
    }

    /// Create with random SSRC, initial sequence number and timestamp base.
    ///
    /// Per RFC 3550 §5.1 the initial values should be random so that
    /// known-plaintext attacks and cross-session collisions are unlikely.
    pub fn with_random_ssrc(pt: u8, clock_rate: u32) -> Self {
        let mut header = Self::new(pt, rand::random::<u32>(), clock_rate);
        header.sequence = rand::random::<u16>();
        header.timestamp_base = rand::random::<u32>();
        header
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Wire timestamp for a presentation time.
    pub fn timestamp_for(&self, pts: Duration) -> u32 {
        self.timestamp_base
            .wrapping_add(pts_to_ticks(pts, self.clock_rate))
    }

    /// Build the next packet and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of an
    /// access unit (RFC 6184 §5.1, RFC 7798 §4.1).
    pub fn next_packet(&mut self, marker: bool, timestamp: u32, payload: Vec<u8>) -> RtpPacket {
        let packet = RtpPacket {
            payload_type: self.pt,
            sequence: self.sequence,
            timestamp,
            marker,
            ssrc: self.ssrc,
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }
}
