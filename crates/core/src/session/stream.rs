use std::fmt;
use std::io;
use std::time::{Instant, SystemTime};

use crate::media::rtcp::{REPORT_INTERVAL, SenderReport};
use crate::media::rtp::RtpHeader;
use crate::transport::MediaSink;

/// One RTP sub-session (video or audio) of an RTSP session.
///
/// Holds the RTP header state (SSRC, sequence number, timestamp), the sink
/// packets are delivered through, and the sender statistics reported in RTCP.
///
/// The SETUP handler creates and installs a stream; from then on only the
/// fan-out engine moves its sequence number and timestamp. The mutating
/// methods are crate-private so nothing outside the delivery path can touch
/// them.
pub struct RtpStream {
    header: RtpHeader,
    sink: Box<dyn MediaSink>,
    packets_sent: u32,
    octets_sent: u32,
    last_report: Option<Instant>,
}

impl RtpStream {
    pub fn new(header: RtpHeader, sink: Box<dyn MediaSink>) -> Self {
        Self {
            header,
            sink,
            packets_sent: 0,
            octets_sent: 0,
            last_report: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// Sequence number of the next packet (used for `RTP-Info`).
    pub fn sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// Current RTP timestamp (used for `RTP-Info`).
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    pub fn octets_sent(&self) -> u32 {
        self.octets_sent
    }

    /// `Transport` header value describing where this stream is delivered.
    pub fn transport_header(&self) -> String {
        self.sink.transport_header()
    }

    /// Interleaved channel pair, when the stream rides the RTSP connection.
    pub fn interleaved_channels(&self) -> Option<(u8, u8)> {
        self.sink.interleaved_channels()
    }

    /// Build and send one RTP packet. The sequence number advances whether
    /// or not the send succeeds; sender statistics only count successes.
    pub(crate) fn send(&mut self, payload: &[u8], marker: bool, pt: u8) -> io::Result<usize> {
        let header = self.header.write_as(pt, marker);
        let mut packet = Vec::with_capacity(header.len() + payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);

        let sent = self.sink.send_rtp(&packet)?;
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(payload.len() as u32);
        Ok(sent)
    }

    /// Burn sequence numbers for packets that were never sent.
    pub(crate) fn skip(&mut self, packets: usize) {
        self.header.skip(packets as u16);
    }

    pub(crate) fn advance_timestamp(&mut self, step: u32) {
        self.header.advance_timestamp(step);
    }

    /// Emit an RTCP Sender Report if [`REPORT_INTERVAL`] has elapsed since
    /// the last one. Returns whether a report went out.
    pub(crate) fn send_report_if_due(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_report
            && now.duration_since(last) < REPORT_INTERVAL
        {
            return false;
        }
        self.last_report = Some(now);

        let report = SenderReport::at(
            SystemTime::now(),
            self.header.ssrc,
            self.header.timestamp(),
            self.packets_sent,
            self.octets_sent,
        );
        match self.sink.send_rtcp(&report.encode()) {
            Ok(_) => {
                tracing::trace!(ssrc = report.ssrc, packets = report.packet_count, "RTCP SR sent");
                true
            }
            Err(e) => {
                tracing::debug!(ssrc = report.ssrc, error = %e, "RTCP SR send failed");
                false
            }
        }
    }
}

impl fmt::Debug for RtpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpStream")
            .field("header", &self.header)
            .field("transport", &self.sink.transport_header())
            .field("packets_sent", &self.packets_sent)
            .field("octets_sent", &self.octets_sent)
            .finish()
    }
}
