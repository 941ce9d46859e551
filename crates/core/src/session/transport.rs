use crate::error::{Result, RtspError};

/// Client transport request parsed from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP;unicast;client_port=8000-8001
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// Transport: RTP/AVP/TCP;interleaved=0-1,RTP/AVP;unicast;client_port=8000-8001
/// ```
///
/// The header may list comma-separated alternatives in order of client
/// preference; the first one the server supports wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSpec {
    /// RTP over UDP to the client's port pair.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    /// RTP framed inside the RTSP connection on the given channels.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

impl TransportSpec {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::TransportSpec;
    ///
    /// let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(spec, TransportSpec::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// assert!(TransportSpec::parse("RTP/AVP;multicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let mut first_error = None;
        for alternative in header.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            match Self::parse_one(alternative) {
                Ok(spec) => return Ok(spec),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| RtspError::UnsupportedTransport(header.to_string())))
    }

    fn parse_one(spec: &str) -> Result<Self> {
        let unsupported = || RtspError::UnsupportedTransport(spec.to_string());
        let mut parts = spec.split(';').map(str::trim);
        let profile = parts.next().unwrap_or_default();
        let interleaved = match profile.to_ascii_uppercase().as_str() {
            "RTP/AVP" | "RTP/AVP/UDP" => false,
            "RTP/AVP/TCP" => true,
            _ => return Err(unsupported()),
        };

        let mut client_ports = None;
        let mut channels = None;
        for param in parts {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            match key.to_ascii_lowercase().as_str() {
                "multicast" => return Err(unsupported()),
                "client_port" => {
                    client_ports = Some(parse_pair::<u16>(value).ok_or_else(unsupported)?);
                }
                "interleaved" => {
                    channels = Some(parse_pair::<u8>(value).ok_or_else(unsupported)?);
                }
                _ => {}
            }
        }

        if interleaved {
            let (rtp_channel, rtcp_channel) = channels.unwrap_or((0, 1));
            Ok(TransportSpec::Interleaved {
                rtp_channel,
                rtcp_channel,
            })
        } else {
            match client_ports {
                Some((rtp, rtcp)) if rtp != 0 => Ok(TransportSpec::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                }),
                _ => Err(unsupported()),
            }
        }
    }
}

/// Parse `a-b` or a lone `a` (implying `a-(a+1)`).
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = <T as TryFrom<u32>>::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_udp() {
        let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
    }

    #[test]
    fn single_client_port_implies_rtcp() {
        let spec = TransportSpec::parse("RTP/AVP/UDP;unicast;client_port=6970").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Udp {
                client_rtp_port: 6970,
                client_rtcp_port: 6971
            }
        );
    }

    #[test]
    fn parse_no_client_port() {
        assert!(matches!(
            TransportSpec::parse("RTP/AVP;unicast"),
            Err(RtspError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn parse_interleaved() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Interleaved {
                rtp_channel: 2,
                rtcp_channel: 3
            }
        );
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }

    #[test]
    fn interleaved_channel_overflow() {
        assert!(TransportSpec::parse("RTP/AVP/TCP;interleaved=255").is_err());
        assert!(TransportSpec::parse("RTP/AVP/TCP;interleaved=300-301").is_err());
    }

    #[test]
    fn multicast_rejected() {
        assert!(matches!(
            TransportSpec::parse("RTP/AVP;multicast;port=5000-5001"),
            Err(RtspError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn unknown_profile_rejected() {
        assert!(TransportSpec::parse("RAW/RAW/UDP;unicast;client_port=5000").is_err());
        assert!(TransportSpec::parse("").is_err());
    }

    #[test]
    fn first_supported_alternative_wins() {
        let spec = TransportSpec::parse(
            "RTP/AVP;multicast, RTP/AVP/TCP;unicast;interleaved=0-1, RTP/AVP;unicast;client_port=5000-5001",
        )
        .unwrap();
        assert_eq!(
            spec,
            TransportSpec::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }
}
