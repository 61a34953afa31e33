//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                            <- protocol version
//! o=<user> <origin> <origin> IN IP4 <addr>       <- origin, server start time
//! s=<session-name>                               <- session name
//! c=IN IP4 <addr>                                <- connection address
//! t=0 0                                          <- timing (live stream)
//! a=tool:ipcam-rtsp                              <- server software (§6)
//! a=sendonly                                     <- direction (§6)
//! m=video 0 RTP/AVP 96                           <- video block
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;profile-level-id=42001e;sprop-parameter-sets=..
//! a=control:track0
//! m=audio 0 RTP/AVP 8                            <- only with audio configured
//! a=rtpmap:8 PCMA/8000
//! a=control:track1
//! ```

use crate::config::{AudioCodec, AudioConfig, StreamConfig};
use crate::media::aac;
use crate::media::h264::ParameterSets;
use crate::session::Track;

/// Build the session description for `config`.
///
/// `sprop-parameter-sets` is included once the encoder's SPS and PPS have
/// been cached; the profile-level-id comes from the cached SPS when present
/// and from the configuration otherwise.
pub fn generate_sdp(
    config: &StreamConfig,
    parameter_sets: &ParameterSets,
    host: &str,
    origin: u64,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {origin} {origin} IN IP4 {host}",
        config.sdp_username
    ));
    sdp.push(format!("s={}", config.session_name));
    sdp.push(format!("c=IN IP4 {host}"));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:ipcam-rtsp".to_string());
    sdp.push("a=sendonly".to_string());

    let pt = config.video.payload_type;
    let profile = parameter_sets
        .profile_level_id()
        .unwrap_or_else(|| config.video.profile_level_id.clone());
    let mut fmtp = format!("a=fmtp:{pt} packetization-mode=1;profile-level-id={profile}");
    if let Some(sprop) = parameter_sets.sprop_parameter_sets() {
        fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
    }
    sdp.push(format!("m=video 0 RTP/AVP {pt}"));
    sdp.push(format!("a=rtpmap:{pt} H264/90000"));
    sdp.push(fmtp);
    sdp.push(format!("a=control:{}", Track::Video.control()));

    if let Some(audio) = &config.audio {
        sdp.extend(audio_block(audio));
    }

    tracing::trace!(sdp = %sdp.join("\\r\\n"), "generated SDP");

    format!("{}\r\n", sdp.join("\r\n"))
}

fn audio_block(audio: &AudioConfig) -> Vec<String> {
    let pt = audio.payload_type();
    let mut lines = vec![format!("m=audio 0 RTP/AVP {pt}")];
    match audio.codec {
        AudioCodec::Pcma | AudioCodec::Pcmu => {
            lines.push(format!("a=rtpmap:{pt} {}/8000", audio.codec.encoding_name()));
        }
        AudioCodec::Aac => {
            lines.push(format!(
                "a=rtpmap:{pt} {}/{}/{}",
                audio.codec.encoding_name(),
                audio.sample_rate,
                audio.channels
            ));
            if let Some(config) = aac::audio_specific_config(audio.sample_rate, audio.channels) {
                lines.push(format!(
                    "a=fmtp:{pt} streamtype=5;profile-level-id=15;mode=AAC-hbr;config={config};\
                     sizelength=13;indexlength=3;indexdeltalength=3"
                ));
            }
        }
    }
    lines.push(format!("a=control:{}", Track::Audio.control()));
    lines
}
