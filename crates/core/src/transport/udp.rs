use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use super::MediaSink;

const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// UDP transport for one RTP sub-session.
///
/// Binds a dedicated ephemeral RTP socket and RTCP socket in the client's
/// address family and sends to the `client_port` pair from SETUP. The local
/// ports are reported back as `server_port`.
pub struct UdpSink {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    rtp_dest: SocketAddr,
    rtcp_dest: SocketAddr,
}

impl UdpSink {
    /// Bind the RTP/RTCP socket pair for a client at `client_ip`.
    pub fn bind(client_ip: IpAddr, rtp_port: u16, rtcp_port: u16) -> io::Result<Self> {
        let any = match client_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let rtp = UdpSocket::bind((any, 0))?;
        let rtcp = UdpSocket::bind((any, 0))?;
        rtp.set_write_timeout(Some(SEND_TIMEOUT))?;
        rtcp.set_write_timeout(Some(SEND_TIMEOUT))?;

        Ok(Self {
            rtp,
            rtcp,
            rtp_dest: SocketAddr::new(client_ip, rtp_port),
            rtcp_dest: SocketAddr::new(client_ip, rtcp_port),
        })
    }

    /// Local `(rtp, rtcp)` ports.
    pub fn server_ports(&self) -> io::Result<(u16, u16)> {
        Ok((self.rtp.local_addr()?.port(), self.rtcp.local_addr()?.port()))
    }

    pub fn client_ports(&self) -> (u16, u16) {
        (self.rtp_dest.port(), self.rtcp_dest.port())
    }
}

fn send_all(socket: &UdpSocket, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
    let sent = socket.send_to(packet, dest)?;
    if sent != packet.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("partial datagram: {sent} of {} bytes", packet.len()),
        ));
    }
    Ok(sent)
}

impl MediaSink for UdpSink {
    fn send_rtp(&mut self, packet: &[u8]) -> io::Result<usize> {
        send_all(&self.rtp, packet, self.rtp_dest)
    }

    fn send_rtcp(&mut self, packet: &[u8]) -> io::Result<usize> {
        send_all(&self.rtcp, packet, self.rtcp_dest)
    }

    fn transport_header(&self) -> String {
        let (client_rtp, client_rtcp) = self.client_ports();
        // Ports of a bound socket are always available; 0 only if the OS refuses.
        let (server_rtp, server_rtcp) = self.server_ports().unwrap_or((0, 0));
        format!(
            "RTP/AVP;unicast;client_port={client_rtp}-{client_rtcp};server_port={server_rtp}-{server_rtcp}"
        )
    }
}
