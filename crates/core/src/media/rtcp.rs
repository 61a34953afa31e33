//! RTCP Sender Reports (RFC 3550 §6.4.1).
//!
//! Each RTP sub-session emits an SR every [`REPORT_INTERVAL`] so receivers
//! can map RTP timestamps to wallclock time and synchronize audio with video.
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  RC=0   |   PT=SR=200   |          length=6             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         SSRC of sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              NTP timestamp, most significant word             |
//! |             NTP timestamp, least significant word             |
//! |                         RTP timestamp                         |
//! |                     sender's packet count                     |
//! |                      sender's octet count                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PT_SR: u8 = 200;

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Encoded size of an SR without report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Build a report stamped with `wallclock`.
    pub fn at(
        wallclock: SystemTime,
        ssrc: u32,
        rtp_timestamp: u32,
        packet_count: u32,
        octet_count: u32,
    ) -> Self {
        let (ntp_seconds, ntp_fraction) = ntp_time(wallclock);
        Self {
            ssrc,
            ntp_seconds,
            ntp_fraction,
            rtp_timestamp,
            packet_count,
            octet_count,
        }
    }

    pub fn encode(&self) -> [u8; SENDER_REPORT_LEN] {
        let mut out = [0u8; SENDER_REPORT_LEN];
        out[0] = 2 << 6;
        out[1] = PT_SR;
        // Length in 32-bit words minus one.
        out[2..4].copy_from_slice(&((SENDER_REPORT_LEN / 4 - 1) as u16).to_be_bytes());
        out[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        out[8..12].copy_from_slice(&self.ntp_seconds.to_be_bytes());
        out[12..16].copy_from_slice(&self.ntp_fraction.to_be_bytes());
        out[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        out[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        out[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        out
    }
}

/// 64-bit NTP timestamp split into seconds and a 2^-32 fraction.
pub fn ntp_time(wallclock: SystemTime) -> (u32, u32) {
    let since_epoch = wallclock.duration_since(UNIX_EPOCH).unwrap_or_default();
    let seconds = (since_epoch.as_secs() + NTP_UNIX_OFFSET) as u32;
    let fraction = ((u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000) as u32;
    (seconds, fraction)
}
