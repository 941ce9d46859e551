//! H.265 (HEVC) RTP packetizer (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte.
//!
//! - **FU format** (§4.4.3): a 2-byte payload header of type 49 followed by
//!   a 1-byte FU header `[S|E|FuType(6)]`.
//!
//! - **SDP attributes** (RFC 7798 §7.1):
//!   ```text
//!   a=rtpmap:96 H265/90000
//!   a=fmtp:96 sprop-vps=...;sprop-sps=...;sprop-pps=...
//!   ```

use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RtpHeader, RtpPacket};
use super::{AccessUnit, Codec, Packetizer};
use crate::error::Result;

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_FU: u8 = 49;

const NAL_HEADER_LEN: usize = 2;
/// Payload header (2) + FU header (1).
const FU_OVERHEAD: usize = 3;

/// H.265 RTP packetizer using single NAL unit packets and FUs.
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    mtu: usize,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32, clock_rate: u32, mtu: usize) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc, clock_rate),
            mtu: mtu.max(FU_OVERHEAD + 1),
        }
    }

    pub fn with_random_ssrc(pt: u8, clock_rate: u32, mtu: usize) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt, clock_rate),
            mtu: mtu.max(FU_OVERHEAD + 1),
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

        let nal_type = (nal_unit[0] >> 1) & 0x3f;
        // F bit and the high LayerId bit stay; Type becomes 49. TID byte is copied.
        let payload_header = [(nal_unit[0] & 0x81) | (NAL_FU << 1), nal_unit[1]];
        let payload = &nal_unit[NAL_HEADER_LEN..];

        let mut fragments = payload.chunks(self.mtu - FU_OVERHEAD).peekable();
        let mut first = true;

        while let Some(chunk) = fragments.next() {
            let last_fragment = fragments.peek().is_none();
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let mut body = Vec::with_capacity(FU_OVERHEAD + chunk.len());
            body.extend_from_slice(&payload_header);
            body.push(start_bit | end_bit | nal_type);
            body.extend_from_slice(chunk);

            packets.push(
                self.header
                    .next_packet(is_last_nal && last_fragment, timestamp, body),
            );
            first = false;
        }

        tracing::trace!(nal_type, nal_size = nal_unit.len(), "FU fragmented NAL unit");
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, access_unit: &AccessUnit) -> Result<Vec<RtpPacket>> {
        access_unit.validate(Codec::H265, NAL_HEADER_LEN)?;

        let timestamp = self.header.timestamp_for(access_unit.pts);
        let mut packets = Vec::new();
        let last = access_unit.nal_units.len() - 1;

        for (i, nal) in access_unit.nal_units.iter().enumerate() {
            self.packetize_nal(nal, timestamp, i == last, &mut packets);
        }

        tracing::trace!(
            nal_count = access_unit.nal_units.len(),
            rtp_packets = packets.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "frame packetized"
        );

        Ok(packets)
    }

    fn codec(&self) -> Codec {
        Codec::H265
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

/// `fmtp` parameters for the SDP (RFC 7798 §7.1). Empty when no parameter
/// sets have been seen.
pub fn fmtp_parameters(vps: Option<&[u8]>, sps: Option<&[u8]>, pps: Option<&[u8]>) -> String {
    [("sprop-vps", vps), ("sprop-sps", sps), ("sprop-pps", pps)]
        .into_iter()
        .filter_map(|(name, set)| set.map(|set| format!("{name}={}", BASE64_STANDARD.encode(set))))
        .collect::<Vec<_>>()
        .join(";")
}
