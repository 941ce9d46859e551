//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and codec-specific
//! implementations that convert encoded access units into RTP packets.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame (access unit) is split into one or more RTP
//! packets. Every RTP packet carries a 12-byte fixed header
//! ([`rtp::RtpPacket`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, typically 90 kHz for video, derived
//!   from the access unit's presentation time.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of an access unit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |

pub mod h264;
pub mod h265;
pub mod rtp;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::{PacketizeErrorKind, Result, RtspError};
use rtp::RtpPacket;

/// Video codecs the camera pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    /// Produced for the preview path; not streamable over RTSP here.
    Mjpeg,
}

impl Codec {
    /// Encoding name for the SDP `a=rtpmap` attribute.
    pub fn encoding_name(self) -> Result<&'static str> {
        match self {
            Codec::H264 => Ok("H264"),
            Codec::H265 => Ok("H265"),
            Codec::Mjpeg => Err(RtspError::UnsupportedCodec(self.to_string())),
        }
    }

    /// Whether a NAL unit carries decoder configuration (VPS/SPS/PPS).
    pub fn is_parameter_set(self, nal: &[u8]) -> bool {
        let Some(&first) = nal.first() else {
            return false;
        };
        match self {
            Codec::H264 => matches!(first & 0x1f, h264::NAL_SPS | h264::NAL_PPS),
            Codec::H265 => matches!(
                (first >> 1) & 0x3f,
                h265::NAL_VPS | h265::NAL_SPS | h265::NAL_PPS
            ),
            Codec::Mjpeg => false,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::Mjpeg => "MJPEG",
        })
    }
}

impl FromStr for Codec {
    type Err = RtspError;

    /// Accepts short names (`h264`, `hevc`) and MIME types (`video/avc`).
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "video/avc" => Ok(Codec::H264),
            "h265" | "hevc" | "video/hevc" => Ok(Codec::H265),
            "mjpeg" | "jpeg" | "video/mjpeg" => Ok(Codec::Mjpeg),
            other => Err(RtspError::UnsupportedCodec(other.to_string())),
        }
    }
}

/// One encoded video frame as delivered by the encoder.
///
/// NAL units are stored without start codes. `is_config` marks access units
/// carrying parameter sets the SDP needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub codec: Codec,
    pub nal_units: Vec<Vec<u8>>,
    /// Presentation time relative to the start of the stream.
    pub pts: Duration,
    pub is_config: bool,
}

impl AccessUnit {
    pub fn new(codec: Codec, nal_units: Vec<Vec<u8>>, pts: Duration) -> Self {
        Self {
            codec,
            nal_units,
            pts,
            is_config: false,
        }
    }

    /// Build an access unit from an Annex B byte stream.
    pub fn from_annex_b(codec: Codec, data: &[u8], pts: Duration) -> Self {
        Self::new(codec, extract_nal_units(data), pts)
    }

    pub fn with_config(mut self, is_config: bool) -> Self {
        self.is_config = is_config;
        self
    }

    /// Total NAL payload size in bytes.
    pub fn len(&self) -> usize {
        self.nal_units.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nal_units.is_empty()
    }

    /// Reject input the packetizers cannot handle, before any sequence
    /// number is consumed.
    pub(crate) fn validate(&self, expected: Codec, min_nal_len: usize) -> Result<()> {
        if self.codec != expected {
            return Err(RtspError::packetize(PacketizeErrorKind::CodecMismatch {
                expected,
                received: self.codec,
            }));
        }
        if self.nal_units.is_empty() {
            return Err(RtspError::packetize(PacketizeErrorKind::EmptyAccessUnit));
        }
        for (i, nal) in self.nal_units.iter().enumerate() {
            if nal.is_empty() {
                return Err(RtspError::packetize(PacketizeErrorKind::EmptyNalUnit(i)));
            }
            if nal.len() < min_nal_len {
                return Err(RtspError::packetize(
                    PacketizeErrorKind::TruncatedNalHeader(i),
                ));
            }
        }
        Ok(())
    }
}

/// Codec-specific RTP packetizer.
///
/// One instance lives in each set-up session, so sequence numbers are
/// per-session and continue across access units. Packetization never
/// reorders or mutates NAL units; on error no sequence number is consumed.
pub trait Packetizer: Send {
    /// Packetize one access unit into RTP packets.
    ///
    /// All packets share the timestamp derived from the access unit's
    /// presentation time; only the last packet carries the marker bit.
    fn packetize(&mut self, access_unit: &AccessUnit) -> Result<Vec<RtpPacket>>;

    fn codec(&self) -> Codec;

    /// RTP clock rate in Hz.
    ///
    /// Video codecs typically use 90000 (90 kHz) per RFC 3551 §4.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551). Dynamic types use 96–127.
    fn payload_type(&self) -> u8;

    fn ssrc(&self) -> u32;

    /// Sequence number the next packet will carry (for `RTP-Info`).
    fn next_sequence(&self) -> u16;

    /// RTP timestamp for the given presentation time (for `RTP-Info`).
    fn rtp_timestamp(&self, pts: Duration) -> u32;
}

/// Create the packetizer for the configured stream codec.
pub fn packetizer_for(config: &StreamConfig) -> Result<Box<dyn Packetizer>> {
    match config.codec {
        Codec::H264 => Ok(Box::new(h264::H264Packetizer::with_random_ssrc(
            config.payload_type,
            config.clock_rate,
            config.mtu,
        ))),
        Codec::H265 => Ok(Box::new(h265::H265Packetizer::with_random_ssrc(
            config.payload_type,
            config.clock_rate,
            config.mtu,
        ))),
        Codec::Mjpeg => Err(RtspError::UnsupportedCodec(config.codec.to_string())),
    }
}

/// Extract NAL units from an Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`) and returns the NAL data between them, excluding
/// the start codes themselves.
///
/// The start code length is tracked per-NAL to ensure boundaries
/// between adjacent NALs are computed correctly when mixed 3-byte
/// and 4-byte start codes appear.
pub fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(data[start..end].to_vec());
        }
    }

    nal_units
}

/// Convert a presentation time to RTP clock ticks (wrapping at 2^32).
pub(crate) fn pts_to_ticks(pts: Duration, clock_rate: u32) -> u32 {
    (pts.as_nanos() * u128::from(clock_rate) / 1_000_000_000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x65, 0xAA, 0xBB]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x67, 0x42], vec![0x68, 0xCE]]);
    }

    #[test]
    fn extract_no_start_code() {
        assert!(extract_nal_units(&[0xFF, 0xFE]).is_empty());
        assert!(extract_nal_units(&[]).is_empty());
    }

    #[test]
    fn codec_from_str() {
        assert_eq!("video/avc".parse::<Codec>().unwrap(), Codec::H264);
        assert_eq!("HEVC".parse::<Codec>().unwrap(), Codec::H265);
        assert!(matches!(
            "vp8".parse::<Codec>(),
            Err(RtspError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn mjpeg_has_no_encoding_name() {
        assert!(Codec::H264.encoding_name().is_ok());
        assert!(matches!(
            Codec::Mjpeg.encoding_name(),
            Err(RtspError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn parameter_set_detection() {
        assert!(Codec::H264.is_parameter_set(&[0x67, 0x42]));
        assert!(Codec::H264.is_parameter_set(&[0x68, 0xce]));
        assert!(!Codec::H264.is_parameter_set(&[0x65, 0x88]));
        // H.265 VPS is type 32: first byte 0x40.
        assert!(Codec::H265.is_parameter_set(&[0x40, 0x01]));
        assert!(!Codec::H265.is_parameter_set(&[0x26, 0x01]));
    }

    #[test]
    fn validate_rejects_malformed_units() {
        let au = AccessUnit::new(Codec::H264, vec![], Duration::ZERO);
        assert!(au.validate(Codec::H264, 1).is_err());

        let au = AccessUnit::new(Codec::H264, vec![vec![0x65], vec![]], Duration::ZERO);
        match au.validate(Codec::H264, 1) {
            Err(RtspError::Packetize { kind }) => {
                assert_eq!(kind, PacketizeErrorKind::EmptyNalUnit(1))
            }
            other => panic!("unexpected {other:?}"),
        }

        let au = AccessUnit::new(Codec::H265, vec![vec![0x26, 0x01]], Duration::ZERO);
        assert!(matches!(
            au.validate(Codec::H264, 1),
            Err(RtspError::Packetize {
                kind: PacketizeErrorKind::CodecMismatch { .. }
            })
        ));
    }

    #[test]
    fn pts_ticks_at_90khz() {
        assert_eq!(pts_to_ticks(Duration::from_secs(1), 90_000), 90_000);
        assert_eq!(pts_to_ticks(Duration::from_millis(40), 90_000), 3_600);
    }
}
