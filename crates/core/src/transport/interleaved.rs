use crate::error::{Result, RtspError};

use super::tcp::ControlChannel;

/// Leading byte of an interleaved binary frame.
pub const MAGIC: u8 = b'$';

/// Frame a payload for the RTSP connection (RFC 2326 §10.12):
/// `$`, one channel byte, 2-byte big-endian length, then the payload.
pub fn encode_frame(channel: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| RtspError::PayloadTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(MAGIC);
    frame.push(channel);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a 4-byte frame header into `(channel, payload_len)`.
pub fn decode_header(header: [u8; 4]) -> Option<(u8, usize)> {
    (header[0] == MAGIC).then(|| (header[1], u16::from_be_bytes([header[2], header[3]]) as usize))
}

/// RTP carried inside the client's RTSP TCP connection.
#[derive(Debug)]
pub struct InterleavedTransport {
    control: ControlChannel,
    rtp_channel: u8,
    rtcp_channel: u8,
}

impl InterleavedTransport {
    pub fn new(control: ControlChannel, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            control,
            rtp_channel,
            rtcp_channel,
        }
    }

    /// Write one RTP packet as a `$` frame. Blocks at most the control
    /// connection's write timeout.
    pub fn send(&self, packet: &[u8]) -> Result<usize> {
        let frame = encode_frame(self.rtp_channel, packet)?;
        self.control.write_all(&frame)?;
        Ok(frame.len())
    }

    pub fn rtp_channel(&self) -> u8 {
        self.rtp_channel
    }

    pub fn rtcp_channel(&self) -> u8 {
        self.rtcp_channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = encode_frame(2, &[0xAA; 300]).unwrap();
        assert_eq!(&frame[..4], &[b'$', 2, 0x01, 0x2C]);
        assert_eq!(frame.len(), 304);
        assert_eq!(decode_header([frame[0], frame[1], frame[2], frame[3]]), Some((2, 300)));
    }

    #[test]
    fn oversized_payload_rejected() {
        assert!(matches!(
            encode_frame(0, &vec![0; 65_536]),
            Err(RtspError::PayloadTooLarge(65_536))
        ));
        assert!(encode_frame(0, &vec![0; 65_535]).is_ok());
    }

    #[test]
    fn non_magic_header() {
        assert_eq!(decode_header(*b"RTSP"), None);
    }
}
