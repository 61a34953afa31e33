//! Media codecs and RTP/RTCP wire formats.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every RTP
//! packet carries a 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit) on the media clock, 90 kHz for video.
//! - **SSRC** (32-bit), randomly chosen to identify the sender.
//! - **Marker bit**, set on the last packet of an access unit.
//!
//! Packetization here is stateless: codec helpers turn a frame into a list of
//! [`RtpPayload`]s once, and the fan-out stamps a per-session header on each.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | RTP payload type |
//! |-------|--------|-----|------------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | dynamic (96) |
//! | G.711 A-law / μ-law | [`g711`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) | 8 / 0 |
//! | AAC-LC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | dynamic (97) |

pub mod aac;
pub mod g711;
pub mod h264;
pub mod rtcp;
pub mod rtp;

/// One RTP payload plus the marker bit it must be sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPayload {
    pub data: Vec<u8>,
    pub marker: bool,
}
