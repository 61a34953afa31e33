/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// One header state exists per RTP sub-session. It manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: 32-bit, wrapping, advanced once per media frame.
/// - **SSRC**: fixed for the life of the stream.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Header state starting at sequence 0, timestamp 0.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::starting_at(pt, ssrc, 0, 0)
    }

    pub fn starting_at(pt: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            sequence,
            timestamp,
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence,
            timestamp,
        }
    }

    /// Random initial sequence number and timestamp (RFC 3550 §5.1), so a
    /// stream cannot be correlated with its start time.
    pub fn randomized(pt: u8, ssrc: u32) -> Self {
        Self::starting_at(pt, ssrc, rand::random(), rand::random())
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp stamped on the current frame.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    pub fn write(&mut self, marker: bool) -> [u8; 12] {
        self.write_as(self.pt, marker)
    }

    /// Like [`write`](Self::write) with an explicit payload type.
    pub fn write_as(&mut self, pt: u8, marker: bool) -> [u8; 12] {
        let mut header = [0u8; 12];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | (pt & 0x7F);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Consume sequence numbers without emitting packets.
    pub fn skip(&mut self, count: u16) {
        self.sequence = self.sequence.wrapping_add(count);
    }

    /// Advance the RTP timestamp by one frame duration in clock ticks.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0], 0x80);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        let no_marker = h.write(false);
        assert_eq!(no_marker[1] & 0x80, 0);

        let with_marker = h.write(true);
        assert_eq!(with_marker[1] & 0x80, 0x80);
        assert_eq!(with_marker[1] & 0x7F, 96);
    }

    #[test]
    fn explicit_payload_type() {
        let mut h = RtpHeader::new(8, 1);
        let buf = h.write_as(0, true);
        assert_eq!(buf[1], 0x80);
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let mut h = RtpHeader::starting_at(96, 1, u16::MAX, 0);
        let buf = h.write(false);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), u16::MAX);
        assert_eq!(h.sequence(), 0);
        h.skip(3);
        assert_eq!(h.sequence(), 3);
    }

    #[test]
    fn ssrc_and_timestamp_written() {
        let mut h = RtpHeader::starting_at(96, 0xAABBCCDD, 0, 0x01020304);
        let buf = h.write(false);
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn timestamp_advance_wraps() {
        let mut h = RtpHeader::starting_at(96, 1, 0, u32::MAX - 1000);
        h.advance_timestamp(3600);
        assert_eq!(h.timestamp(), 2599);
    }
}
