//! Stream configuration.
//!
//! One [`StreamConfig`] describes one listening port and stream path: the
//! video encoder parameters, the optional audio track, and the values
//! advertised in SDP. It is validated once by [`Server::start`](crate::Server::start).

use crate::error::{Result, RtspError};
use crate::media::aac;

/// Default RTP payload budget (link MTU minus IP/UDP/RTP overhead).
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

const MIN_PAYLOAD: usize = 64;
const MAX_PAYLOAD: usize = 65_000;

/// Dynamic RTP payload type range (RFC 3551 §6).
const DYNAMIC_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 96..=127;

/// Configuration for a single RTSP stream endpoint.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Local address the RTSP listener binds to.
    pub bind_host: String,
    /// RTSP port. `0` picks an ephemeral port (see [`Server::local_addr`](crate::Server::local_addr)).
    pub port: u16,
    /// Stream path, e.g. `/stream`.
    pub path: String,
    /// SDP session name (`s=`).
    pub session_name: String,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// Host advertised in SDP and stream URLs. When `None`, the outward
    /// IPv4 address of this machine is used.
    pub public_host: Option<String>,
    /// Maximum RTP payload size before H.264 NAL units are FU-A fragmented.
    pub max_payload: usize,
    pub video: VideoConfig,
    /// Audio track; `None` disables audio entirely (no `m=audio`, no track1).
    pub audio: Option<AudioConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 554,
            path: "/stream".to_string(),
            session_name: "RTSP Session".to_string(),
            sdp_username: "-".to_string(),
            public_host: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
            video: VideoConfig::default(),
            audio: None,
        }
    }
}

impl StreamConfig {
    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Check the configuration for values the engine cannot stream.
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(invalid(format!("stream path {:?} must start with '/'", self.path)));
        }
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&self.max_payload) {
            return Err(invalid(format!(
                "max_payload {} outside {MIN_PAYLOAD}..={MAX_PAYLOAD}",
                self.max_payload
            )));
        }
        self.video.validate()?;
        if let Some(audio) = &self.audio {
            audio.validate()?;
            if audio.payload_type() == self.video.payload_type {
                return Err(invalid(format!(
                    "audio and video share RTP payload type {}",
                    self.video.payload_type
                )));
            }
        }
        Ok(())
    }
}

/// H.264 encoder parameters.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Keyframe interval in frames.
    pub gop: u32,
    /// Dynamic RTP payload type for H.264.
    pub payload_type: u8,
    /// `profile-level-id` advertised until a live SPS has been seen.
    pub profile_level_id: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 25,
            bitrate_kbps: 2048,
            gop: 50,
            payload_type: 96,
            profile_level_id: "42001e".to_string(),
        }
    }
}

impl VideoConfig {
    /// RTP timestamp increment per frame on the 90 kHz clock.
    pub fn timestamp_step(&self) -> u32 {
        90_000 / self.fps.max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(invalid("video fps must be non-zero".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "video resolution {}x{} is empty",
                self.width, self.height
            )));
        }
        if !DYNAMIC_PAYLOAD_TYPES.contains(&self.payload_type) {
            return Err(invalid(format!(
                "video payload type {} is not in the dynamic range",
                self.payload_type
            )));
        }
        let valid_hex = self.profile_level_id.len() == 6
            && self.profile_level_id.chars().all(|c| c.is_ascii_hexdigit());
        if !valid_hex {
            return Err(invalid(format!(
                "profile-level-id {:?} must be 6 hex digits",
                self.profile_level_id
            )));
        }
        Ok(())
    }
}

/// Audio codecs the engine can packetize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// G.711 A-law.
    Pcma,
    /// G.711 μ-law.
    Pcmu,
    /// MPEG-4 AAC-LC (RFC 3640 AAC-hbr).
    Aac,
}

impl AudioCodec {
    /// SDP encoding name.
    pub fn encoding_name(self) -> &'static str {
        match self {
            Self::Pcma => "PCMA",
            Self::Pcmu => "PCMU",
            Self::Aac => "MPEG4-GENERIC",
        }
    }
}

/// Audio capture/encoder parameters.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate_kbps: u32,
    /// Dynamic payload type used when `codec` is AAC. G.711 always uses
    /// its static RFC 3551 number.
    pub aac_payload_type: u8,
}

impl AudioConfig {
    /// 8 kHz mono G.711 with the given law.
    pub fn g711(codec: AudioCodec) -> Self {
        Self {
            codec,
            sample_rate: 8000,
            channels: 1,
            bitrate_kbps: 64,
            aac_payload_type: 97,
        }
    }

    pub fn aac(sample_rate: u32, channels: u8) -> Self {
        Self {
            codec: AudioCodec::Aac,
            sample_rate,
            channels,
            bitrate_kbps: 64,
            aac_payload_type: 97,
        }
    }

    /// RTP payload type for this codec: PCMU=0, PCMA=8, AAC=configured.
    pub fn payload_type(&self) -> u8 {
        match self.codec {
            AudioCodec::Pcmu => 0,
            AudioCodec::Pcma => 8,
            AudioCodec::Aac => self.aac_payload_type,
        }
    }

    /// RTP timestamp increment per delivered frame (20 ms cadence).
    pub fn timestamp_step(&self) -> u32 {
        self.sample_rate / 50
    }

    /// Samples per channel in one 20 ms frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate / 50) as usize
    }

    fn validate(&self) -> Result<()> {
        match self.codec {
            AudioCodec::Pcma | AudioCodec::Pcmu => {
                if self.sample_rate != 8000 || self.channels != 1 {
                    return Err(invalid(format!(
                        "G.711 requires 8000 Hz mono, got {} Hz x{}",
                        self.sample_rate, self.channels
                    )));
                }
            }
            AudioCodec::Aac => {
                if aac::sampling_frequency_index(self.sample_rate).is_none() {
                    return Err(invalid(format!(
                        "AAC sample rate {} has no MPEG-4 frequency index",
                        self.sample_rate
                    )));
                }
                if !(1..=2).contains(&self.channels) {
                    return Err(invalid(format!(
                        "AAC supports 1 or 2 channels, got {}",
                        self.channels
                    )));
                }
                if !DYNAMIC_PAYLOAD_TYPES.contains(&self.aac_payload_type) {
                    return Err(invalid(format!(
                        "AAC payload type {} is not in the dynamic range",
                        self.aac_payload_type
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(reason: String) -> RtspError {
    RtspError::InvalidConfig(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        StreamConfig::default().validate().unwrap();
    }

    #[test]
    fn video_timestamp_step_is_90khz_per_frame() {
        let video = VideoConfig {
            fps: 25,
            ..VideoConfig::default()
        };
        assert_eq!(video.timestamp_step(), 3600);
    }

    #[test]
    fn g711_payload_types_are_static() {
        assert_eq!(AudioConfig::g711(AudioCodec::Pcma).payload_type(), 8);
        assert_eq!(AudioConfig::g711(AudioCodec::Pcmu).payload_type(), 0);
        assert_eq!(AudioConfig::g711(AudioCodec::Pcmu).timestamp_step(), 160);
    }

    #[test]
    fn rejects_colliding_payload_types() {
        let mut audio = AudioConfig::aac(16000, 1);
        audio.aac_payload_type = 96;
        let config = StreamConfig {
            audio: Some(audio),
            ..StreamConfig::default()
        };
        assert!(matches!(config.validate(), Err(RtspError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_wideband_g711() {
        let mut audio = AudioConfig::g711(AudioCodec::Pcma);
        audio.sample_rate = 16000;
        let config = StreamConfig {
            audio: Some(audio),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_fps_and_bad_path() {
        let mut config = StreamConfig::default();
        config.video.fps = 0;
        assert!(config.validate().is_err());

        let config = StreamConfig {
            path: "stream".to_string(),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_payload_budget() {
        let config = StreamConfig {
            max_payload: 10,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
