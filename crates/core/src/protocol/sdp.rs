//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:camstream-rtsp                         ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! a=range:npt=0-                                ← open-ended live range
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...            ← codec parameters
//! a=framesize:96 1920-1080                      ← picture size
//! a=framerate:30                                ← nominal frame rate
//! a=control:track1                              ← track control URL
//! ```

use crate::config::StreamConfig;
use crate::error::Result;
use crate::media::{Codec, h264, h265};
use crate::mount::ParameterSets;

/// Everything that goes into a DESCRIBE body.
#[derive(Debug, Clone, Copy)]
pub struct SessionDescription<'a> {
    pub stream: &'a StreamConfig,
    pub parameter_sets: &'a ParameterSets,
    /// Address for the `o=` and `c=` lines.
    pub host: &'a str,
    pub username: &'a str,
    pub session_id: &'a str,
    pub session_version: &'a str,
    pub session_name: &'a str,
}

/// Generate an SDP document with a single video media section.
///
/// Pure and deterministic; fails only with
/// [`UnsupportedCodec`](crate::RtspError::UnsupportedCodec).
pub fn generate_sdp(desc: &SessionDescription<'_>) -> Result<String> {
    let stream = desc.stream;
    let encoding = stream.codec.encoding_name()?;
    let pt = stream.payload_type;
    let addr_type = if desc.host.contains(':') { "IP6" } else { "IP4" };

    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!(
            "o={} {} {} IN {} {}",
            desc.username, desc.session_id, desc.session_version, addr_type, desc.host
        ),
        format!("s={}", desc.session_name),
        format!("c=IN {} {}", addr_type, desc.host),
        "t=0 0".to_string(),
        "a=tool:camstream-rtsp".to_string(),
        "a=sendonly".to_string(),
        "a=range:npt=0-".to_string(),
        format!("m=video 0 RTP/AVP {}", pt),
        // rtpmap defines the payload type and must precede fmtp (RFC 6184 §8.2.1).
        format!("a=rtpmap:{} {}/{}", pt, encoding, stream.clock_rate),
    ];

    let sets = desc.parameter_sets;
    let fmtp = match stream.codec {
        Codec::H264 => h264::fmtp_parameters(sets.sps.as_deref(), sets.pps.as_deref()),
        _ => h265::fmtp_parameters(
            sets.vps.as_deref(),
            sets.sps.as_deref(),
            sets.pps.as_deref(),
        ),
    };
    if !fmtp.is_empty() {
        sdp.push(format!("a=fmtp:{} {}", pt, fmtp));
    }

    sdp.push(format!("a=framesize:{} {}-{}", pt, stream.width, stream.height));
    if let Some(fps) = stream.framerate {
        sdp.push(format!("a=framerate:{}", fps));
    }
    sdp.push("a=control:track1".to_string());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    Ok(format!("{}\r\n", sdp.join("\r\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RtspError;

    fn describe(stream: &StreamConfig, sets: &ParameterSets, host: &str) -> Result<String> {
        generate_sdp(&SessionDescription {
            stream,
            parameter_sets: sets,
            host,
            username: "server",
            session_id: "1234567890",
            session_version: "1",
            session_name: "Test Session",
        })
    }

    #[test]
    fn generates_h264_sdp() {
        let stream = StreamConfig::default();
        let sdp = describe(&stream, &ParameterSets::default(), "192.168.1.100").unwrap();
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=server 1234567890 1 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=fmtp:96 packetization-mode=1\r\n"));
        assert!(sdp.contains("a=framesize:96 1920-1080\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));
        assert_eq!(sdp.matches("m=").count(), 1);

        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        let fmtp_idx = sdp.find("a=fmtp").unwrap();
        let sendonly_idx = sdp.find("a=sendonly").unwrap();
        let m_idx = sdp.find("m=video").unwrap();
        assert!(rtpmap_idx < fmtp_idx, "a=rtpmap must precede a=fmtp per RFC 6184");
        assert!(sendonly_idx < m_idx, "session-level attrs must precede m= line");
        assert!(fmtp_idx > m_idx, "media attributes must follow m=video");
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn h264_sprop_from_parameter_sets() {
        let sets = ParameterSets {
            vps: None,
            sps: Some(vec![0x67, 0x64, 0x00, 0x28]),
            pps: Some(vec![0x68, 0xee, 0x3c, 0x80]),
        };
        let sdp = describe(&StreamConfig::default(), &sets, "10.0.0.2").unwrap();
        assert!(sdp.contains(
            "a=fmtp:96 packetization-mode=1;profile-level-id=640028;sprop-parameter-sets=Z2QAKA==,aO48gA==\r\n"
        ));
    }

    #[test]
    fn h265_sdp() {
        let stream = StreamConfig::new(Codec::H265, 1280, 720);
        let sets = ParameterSets {
            vps: Some(vec![0x40, 0x01]),
            sps: Some(vec![0x42, 0x01]),
            pps: Some(vec![0x44, 0x01]),
        };
        let sdp = describe(&stream, &sets, "10.0.0.2").unwrap();
        assert!(sdp.contains("a=rtpmap:96 H265/90000\r\n"));
        assert!(sdp.contains("a=fmtp:96 sprop-vps=QAE=;sprop-sps=QgE=;sprop-pps=RAE=\r\n"));
        assert!(sdp.contains("a=framesize:96 1280-720\r\n"));

        let sdp = describe(&stream, &ParameterSets::default(), "10.0.0.2").unwrap();
        assert!(!sdp.contains("a=fmtp"));
    }

    #[test]
    fn ipv6_host() {
        let sdp = describe(&StreamConfig::default(), &ParameterSets::default(), "::1").unwrap();
        assert!(sdp.contains("c=IN IP6 ::1\r\n"));
    }

    #[test]
    fn unsupported_codec() {
        let stream = StreamConfig::new(Codec::Mjpeg, 640, 480);
        assert!(matches!(
            describe(&stream, &ParameterSets::default(), "10.0.0.2"),
            Err(RtspError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn deterministic() {
        let stream = StreamConfig::default();
        let sets = ParameterSets::default();
        assert_eq!(
            describe(&stream, &sets, "h").unwrap(),
            describe(&stream, &sets, "h").unwrap()
        );
    }
}
