//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): the RTSP listener and one thread per client
//!   connection carrying request/response signaling.
//! - **UDP** ([`udp`]): a dedicated RTP/RTCP socket pair per sub-session,
//!   sending to the ports the client asked for in SETUP.
//! - **Interleaved** ([`interleaved`]): RTP/RTCP multiplexed onto the RTSP
//!   TCP connection using `$` framing (RFC 2326 §10.12).
//!
//! Both media transports implement [`MediaSink`], so the fan-out engine
//! does not care which one a session negotiated.

pub mod interleaved;
pub mod tcp;
pub mod udp;

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

pub use interleaved::InterleavedSink;
pub use udp::UdpSink;

use crate::session::RtpStream;

/// Destination for one RTP sub-session's packets.
pub trait MediaSink: Send {
    /// Send a complete RTP packet (header included).
    fn send_rtp(&mut self, packet: &[u8]) -> io::Result<usize>;

    /// Send a complete RTCP packet.
    fn send_rtcp(&mut self, packet: &[u8]) -> io::Result<usize>;

    /// `Transport` header value advertised in the SETUP response.
    fn transport_header(&self) -> String;

    /// RTP/RTCP channel pair when multiplexed on the RTSP connection.
    fn interleaved_channels(&self) -> Option<(u8, u8)> {
        None
    }
}

/// Stamp and send one H.264 RTP packet on a video sub-session.
pub fn send_video_packet(stream: &mut RtpStream, payload: &[u8], marker: bool) -> io::Result<usize> {
    let pt = stream.payload_type();
    stream.send(payload, marker, pt)
}

/// Stamp and send one audio RTP packet with the codec's payload type.
pub fn send_audio_packet(
    stream: &mut RtpStream,
    payload: &[u8],
    marker: bool,
    payload_type: u8,
) -> io::Result<usize> {
    stream.send(payload, marker, payload_type)
}

/// Best-effort outward IPv4 address of this host.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
