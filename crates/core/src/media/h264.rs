use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RtpHeader, RtpPacket};
use super::{AccessUnit, Codec, Packetizer};
use crate::error::Result;

pub const DEFAULT_MTU: usize = 1400;

/// NAL unit type of a sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set.
pub const NAL_PPS: u8 = 8;
/// Payload type of a Fragmentation Unit A (RFC 6184 §5.8).
pub const NAL_FU_A: u8 = 28;

/// FU indicator + FU header.
const FU_A_OVERHEAD: usize = 2;

/// H.264 RTP packetizer (RFC 6184, packetization-mode=1).
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the MTU are sent
///   as-is in a single RTP packet (12-byte header + NAL bytes).
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the MTU are split
///   across multiple RTP packets. Each fragment carries a 2-byte FU
///   header (FU indicator + FU header) before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
/// The original NAL header byte is not transmitted in fragments; a receiver
/// rebuilds it from the FU indicator's F/NRI bits and the FU header's type.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    mtu: usize,
}

impl H264Packetizer {
    /// Create with explicit payload type and SSRC.
    pub fn new(pt: u8, ssrc: u32, clock_rate: u32, mtu: usize) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc, clock_rate),
            mtu: mtu.max(FU_A_OVERHEAD + 1),
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8, clock_rate: u32, mtu: usize) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt, clock_rate),
            mtu: mtu.max(FU_A_OVERHEAD + 1),
        }
    }

    fn packetize_nal(
        &mut self,
        nal_unit: &[u8],
        timestamp: u32,
        is_last_nal: bool,
        packets: &mut Vec<RtpPacket>,
    ) {
        if nal_unit.len() <= self.mtu {
            packets.push(
                self.header
                    .next_packet(is_last_nal, timestamp, nal_unit.to_vec()),
            );
            return;
        }

        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        // F and NRI carried over from the original header.
        let fu_indicator = (nal_header & 0xe0) | NAL_FU_A;
        let payload = &nal_unit[1..];

        let max_fragment = self.mtu - FU_A_OVERHEAD;
        let mut fragments = payload.chunks(max_fragment).peekable();
        let mut first = true;
        let mut count = 0usize;

        while let Some(chunk) = fragments.next() {
            let last_fragment = fragments.peek().is_none();

            // FU header: S=start, E=end, R=0, Type=original NAL type
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let mut body = Vec::with_capacity(FU_A_OVERHEAD + chunk.len());
            body.push(fu_indicator);
            body.push(start_bit | end_bit | nal_type);
            body.extend_from_slice(chunk);

            packets.push(
                self.header
                    .next_packet(is_last_nal && last_fragment, timestamp, body),
            );
            first = false;
            count += 1;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = count,
            "FU-A fragmented NAL unit"
        );
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, access_unit: &AccessUnit) -> Result<Vec<RtpPacket>> {
        access_unit.validate(Codec::H264, 1)?;

        let timestamp = self.header.timestamp_for(access_unit.pts);
        let mut packets = Vec::new();
        let last = access_unit.nal_units.len() - 1;

        for (i, nal) in access_unit.nal_units.iter().enumerate() {
            self.packetize_nal(nal, timestamp, i == last, &mut packets);
        }

        tracing::trace!(
            nal_count = access_unit.nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = access_unit.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "frame packetized"
        );

        Ok(packets)
    }

    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn clock_rate(&self) -> u32 {
        self.header.clock_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn rtp_timestamp(&self, pts: Duration) -> u32 {
        self.header.timestamp_for(pts)
    }
}

/// `fmtp` parameters for the SDP (RFC 6184 §8.1).
///
/// `profile-level-id` comes from SPS bytes 1–3 (profile_idc, constraint
/// flags, level_idc); `sprop-parameter-sets` is the base64 SPS and PPS.
/// Either is omitted when the parameter sets have not been seen yet.
pub fn fmtp_parameters(sps: Option<&[u8]>, pps: Option<&[u8]>) -> String {
    let mut fmtp = String::from("packetization-mode=1");
    if let Some(sps) = sps.filter(|sps| sps.len() >= 4) {
        fmtp.push_str(&format!(
            ";profile-level-id={:02x}{:02x}{:02x}",
            sps[1], sps[2], sps[3]
        ));
    }
    if let (Some(sps), Some(pps)) = (sps, pps) {
        fmtp.push_str(&format!(
            ";sprop-parameter-sets={},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ));
    }
    fmtp
}
