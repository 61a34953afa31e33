use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;

use super::MediaSink;

/// Magic byte that starts an interleaved frame (RFC 2326 §10.12).
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Write one `$ | channel | length | payload` frame as a single write.
///
/// Frames are never split across writes so they cannot interleave with RTSP
/// responses or other frames sharing the same connection.
pub fn write_interleaved<W: Write>(writer: &mut W, channel: u8, payload: &[u8]) -> io::Result<usize> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interleaved payload too large: {} bytes", payload.len()),
        )
    })?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(INTERLEAVED_MAGIC);
    frame.push(channel);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    Ok(frame.len())
}

/// RTP/RTCP delivered over the client's RTSP connection.
///
/// A write that fails after the frame has been handed to the socket may have
/// left part of it on the wire. The connection is shut down at that point:
/// nothing written after a truncated frame could be parsed by the client.
pub struct InterleavedSink {
    writer: Arc<Mutex<TcpStream>>,
    rtp_channel: u8,
    rtcp_channel: u8,
}

impl InterleavedSink {
    pub fn new(writer: Arc<Mutex<TcpStream>>, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            writer,
            rtp_channel,
            rtcp_channel,
        }
    }

    fn send_frame(&self, channel: u8, packet: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock();
        match write_interleaved(&mut *writer, channel, packet) {
            Ok(n) => Ok(n),
            // Rejected before anything was written.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Err(e),
            Err(e) => {
                let _ = writer.shutdown(Shutdown::Both);
                Err(e)
            }
        }
    }
}

impl MediaSink for InterleavedSink {
    fn send_rtp(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.send_frame(self.rtp_channel, packet)
    }

    fn send_rtcp(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.send_frame(self.rtcp_channel, packet)
    }

    fn transport_header(&self) -> String {
        format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            self.rtp_channel, self.rtcp_channel
        )
    }

    fn interleaved_channels(&self) -> Option<(u8, u8)> {
        Some((self.rtp_channel, self.rtcp_channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let mut out = Vec::new();
        let written = write_interleaved(&mut out, 2, &[0xAA; 300]).unwrap();
        assert_eq!(written, 304);
        assert_eq!(&out[..4], &[b'$', 2, 0x01, 0x2C][..]);
        assert!(out[4..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut out = Vec::new();
        let err = write_interleaved(&mut out, 0, &vec![0; 70_000]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(out.is_empty());
    }
}
