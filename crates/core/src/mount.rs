use std::time::Duration;

use parking_lot::RwLock;

use crate::config::StreamConfig;
use crate::media::h265;
use crate::media::{AccessUnit, Codec};

/// Decoder configuration NAL units captured from the live stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    /// H.265 only.
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn is_complete(&self, codec: Codec) -> bool {
        let base = self.sps.is_some() && self.pps.is_some();
        match codec {
            Codec::H265 => base && self.vps.is_some(),
            _ => base,
        }
    }
}

/// The published stream endpoint (e.g. `/stream`).
///
/// Holds the configured stream parameters plus what has been learned from
/// the encoder feed: the most recent parameter sets (for SDP) and the
/// latest presentation time (for `RTP-Info`).
pub struct Mount {
    path: String,
    stream: StreamConfig,
    parameter_sets: RwLock<ParameterSets>,
    last_pts: RwLock<Duration>,
}

impl Mount {
    pub fn new(path: &str, stream: StreamConfig) -> Self {
        Self {
            path: path.to_string(),
            stream,
            parameter_sets: RwLock::new(ParameterSets::default()),
            last_pts: RwLock::new(Duration::ZERO),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    /// Whether a request URI addresses this stream (or one of its tracks).
    pub fn matches(&self, uri: &str) -> bool {
        extract_mount_path(uri) == self.path
    }

    pub fn parameter_sets(&self) -> ParameterSets {
        self.parameter_sets.read().clone()
    }

    pub fn last_pts(&self) -> Duration {
        *self.last_pts.read()
    }

    /// Learn from an access unit on its way to the sessions.
    ///
    /// Parameter sets are replaced whenever a new one arrives, so an encoder
    /// restart with different settings is reflected in later DESCRIBEs.
    pub fn observe(&self, access_unit: &AccessUnit) {
        *self.last_pts.write() = access_unit.pts;

        let codec = self.stream.codec;
        let candidates: Vec<&Vec<u8>> = access_unit
            .nal_units
            .iter()
            .filter(|nal| codec.is_parameter_set(nal))
            .collect();
        if candidates.is_empty() {
            if access_unit.is_config {
                tracing::warn!(mount = %self.path, "config access unit without parameter sets");
            }
            return;
        }

        let mut sets = self.parameter_sets.write();
        for nal in candidates {
            let slot = match codec {
                Codec::H265 => match (nal[0] >> 1) & 0x3f {
                    h265::NAL_VPS => &mut sets.vps,
                    h265::NAL_SPS => &mut sets.sps,
                    _ => &mut sets.pps,
                },
                _ => match nal[0] & 0x1f {
                    crate::media::h264::NAL_SPS => &mut sets.sps,
                    _ => &mut sets.pps,
                },
            };
            if slot.as_deref() != Some(nal.as_slice()) {
                tracing::debug!(mount = %self.path, bytes = nal.len(), "parameter set captured");
                *slot = Some(nal.clone());
            }
        }
    }
}

/// Extract the mount path from an RTSP URI.
///
/// `rtsp://host:8554/stream/track1` → `/stream`
/// `rtsp://host:8554/stream/`       → `/stream`
/// `rtsp://host:8554`               → `/`
/// `/camera1?x=1`                   → `/camera1`
/// `*`                              → `*`
pub fn extract_mount_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else {
        uri
    };

    let path = path.split('?').next().unwrap_or(path);
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };

    // Strip track suffix: /stream/track1 → /stream
    match path.rfind("/track") {
        Some(0) => "/",
        Some(pos) => &path[..pos],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount() -> Mount {
        Mount::new("/stream", StreamConfig::default())
    }

    #[test]
    fn extract_path_full_uri() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554/stream"), "/stream");
    }

    #[test]
    fn extract_path_with_track() {
        assert_eq!(
            extract_mount_path("rtsp://10.0.0.1:8554/camera1/track1"),
            "/camera1"
        );
    }

    #[test]
    fn extract_path_no_path() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554"), "/");
    }

    #[test]
    fn extract_path_trailing_slash_and_query() {
        assert_eq!(extract_mount_path("rtsp://h/stream/"), "/stream");
        assert_eq!(extract_mount_path("/camera1?token=x"), "/camera1");
        assert_eq!(extract_mount_path("*"), "*");
    }

    #[test]
    fn matches_stream_and_tracks_only() {
        let m = mount();
        assert!(m.matches("rtsp://localhost:8554/stream"));
        assert!(m.matches("rtsp://localhost:8554/stream/track1"));
        assert!(!m.matches("rtsp://localhost:8554/other"));
        assert!(!m.matches("rtsp://localhost:8554"));
    }

    #[test]
    fn captures_h264_parameter_sets() {
        let m = mount();
        let au = AccessUnit::new(
            Codec::H264,
            vec![vec![0x67, 0x42, 0x00, 0x1e], vec![0x68, 0xce], vec![0x65, 0x88]],
            Duration::from_millis(33),
        )
        .with_config(true);
        m.observe(&au);
        let sets = m.parameter_sets();
        assert_eq!(sets.sps.as_deref(), Some(&[0x67, 0x42, 0x00, 0x1e][..]));
        assert_eq!(sets.pps.as_deref(), Some(&[0x68, 0xce][..]));
        assert!(sets.is_complete(Codec::H264));
        assert_eq!(m.last_pts(), Duration::from_millis(33));
    }

    #[test]
    fn captures_h265_parameter_sets() {
        let m = Mount::new("/stream", StreamConfig::new(Codec::H265, 1280, 720));
        let au = AccessUnit::new(
            Codec::H265,
            vec![vec![0x40, 0x01], vec![0x42, 0x01], vec![0x44, 0x01]],
            Duration::ZERO,
        );
        m.observe(&au);
        assert!(m.parameter_sets().is_complete(Codec::H265));
    }
}
