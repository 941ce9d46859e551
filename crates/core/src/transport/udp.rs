use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::Result;

/// UDP transport for outbound RTP packet delivery to one client.
///
/// Binds an ephemeral socket on the same local address as the control
/// connection and sends datagrams to `client_ip:client_rtp_port`. The
/// socket is non-blocking: a full send buffer drops the datagram instead
/// of stalling the session's delivery worker.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    dest: SocketAddr,
    client_rtcp_port: u16,
}

impl UdpTransport {
    /// Bind a socket for RTP toward `client_ip`.
    ///
    /// RTCP is not produced, so only the RTP socket is bound; the advertised
    /// server RTCP port is the RTP port plus one.
    pub fn bind(
        local_ip: IpAddr,
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
        socket.set_nonblocking(true)?;
        let dest = SocketAddr::new(client_ip, client_rtp_port);
        tracing::debug!(local = ?socket.local_addr().ok(), %dest, "UDP transport bound");
        Ok(Self {
            socket,
            dest,
            client_rtcp_port,
        })
    }

    pub fn send(&self, packet: &[u8]) -> Result<usize> {
        match self.socket.send_to(packet, self.dest) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::trace!(dest = %self.dest, "UDP send buffer full, datagram dropped");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    pub fn client_rtp_port(&self) -> u16 {
        self.dest.port()
    }

    pub fn client_rtcp_port(&self) -> u16 {
        self.client_rtcp_port
    }

    pub fn server_rtp_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn sends_datagram_to_client_port() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = client.local_addr().unwrap().port();

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let transport = UdpTransport::bind(localhost, localhost, port, port + 1).unwrap();
        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 3);

        let mut buf = [0u8; 16];
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        assert_eq!(from.port(), transport.server_rtp_port());
        assert_eq!(transport.client_rtcp_port(), port + 1);
    }
}
