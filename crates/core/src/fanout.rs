//! Encoder-to-clients fan-out.
//!
//! One video thread and, with audio configured, one audio thread pull
//! frames from the capture pipeline and deliver them to every PLAYING
//! session:
//!
//! ```text
//! VideoSource ─► packetize once ─► registry.playing() snapshot ─► per session:
//!                                                                 lock video stream
//!                                                                 send packets
//!                                                                 RTCP SR if due
//!                                                                 advance timestamp
//! ```
//!
//! The registry lock is only held while taking the snapshot. A session
//! whose send fails loses the rest of that frame but keeps consuming
//! sequence numbers, so the client sees the loss as a gap; the other
//! sessions are unaffected. Interleaved sessions are the exception: a failed
//! write can leave a partial `$` frame on the RTSP connection, so the session
//! is closed instead.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::{AudioPipeline, VideoSource};
use crate::config::{AudioCodec, StreamConfig};
use crate::media::h264::{self, ParameterSets};
use crate::media::{RtpPayload, aac};
use crate::session::{RtpStream, SessionRegistry, Track};
use crate::transport::{send_audio_packet, send_video_packet};

const FRAME_TIMEOUT: Duration = Duration::from_millis(100);
const IDLE_SLEEP: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Delivery counters shared between the fan-out threads and the server.
#[derive(Debug, Default)]
pub struct StreamStats {
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    audio_frames_sent: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// RTP bytes (headers included) handed to the transports.
    pub bytes_sent: u64,
    /// Video frames fanned out.
    pub frames_sent: u64,
    /// Audio frames fanned out.
    pub audio_frames_sent: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AudioPlan {
    codec: AudioCodec,
    payload_type: u8,
    timestamp_step: u32,
}

/// Packetizes encoder output and pushes it to the PLAYING sessions.
#[derive(Clone)]
pub struct FanOut {
    registry: SessionRegistry,
    parameter_sets: Arc<ParameterSets>,
    stats: Arc<StreamStats>,
    max_payload: usize,
    video_timestamp_step: u32,
    audio: Option<AudioPlan>,
}

impl FanOut {
    pub fn new(
        config: &StreamConfig,
        registry: SessionRegistry,
        parameter_sets: Arc<ParameterSets>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            registry,
            parameter_sets,
            stats,
            max_payload: config.max_payload,
            video_timestamp_step: config.video.timestamp_step(),
            audio: config.audio.as_ref().map(|audio| AudioPlan {
                codec: audio.codec,
                payload_type: audio.payload_type(),
                timestamp_step: audio.timestamp_step(),
            }),
        }
    }

    /// Deliver one encoded H.264 access unit. Returns the number of sessions
    /// that received the whole frame.
    pub fn deliver_video(&self, frame: &[u8]) -> usize {
        if !self.parameter_sets.is_complete() {
            self.parameter_sets.extract_sps_pps(frame);
        }

        let packets = h264::packetize_access_unit(frame, self.max_payload);
        if packets.is_empty() {
            tracing::trace!(bytes = frame.len(), "frame without NAL units skipped");
            return 0;
        }
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);

        self.fan_out(Track::Video, &packets, self.video_timestamp_step, |stream, packet| {
            send_video_packet(stream, &packet.data, packet.marker)
        })
    }

    /// Deliver one encoded audio frame. AAC frames are stripped of any ADTS
    /// header and framed per RFC 3640. Returns the number of sessions that
    /// received it; always 0 when audio is not configured.
    pub fn deliver_audio(&self, encoded: &[u8]) -> usize {
        let Some(plan) = self.audio else {
            return 0;
        };
        if encoded.is_empty() {
            return 0;
        }

        let packet = match plan.codec {
            AudioCodec::Aac => RtpPayload {
                data: aac::au_payload(aac::strip_adts(encoded)),
                marker: true,
            },
            AudioCodec::Pcma | AudioCodec::Pcmu => RtpPayload {
                data: encoded.to_vec(),
                marker: false,
            },
        };
        self.stats.audio_frames_sent.fetch_add(1, Ordering::Relaxed);

        self.fan_out(
            Track::Audio,
            std::slice::from_ref(&packet),
            plan.timestamp_step,
            |stream, packet| send_audio_packet(stream, &packet.data, packet.marker, plan.payload_type),
        )
    }

    fn fan_out<F>(&self, track: Track, packets: &[RtpPayload], timestamp_step: u32, send: F) -> usize
    where
        F: Fn(&mut RtpStream, &RtpPayload) -> io::Result<usize>,
    {
        let now = Instant::now();
        let mut delivered = 0;

        for session in self.registry.playing() {
            let mut guard = session.stream(track).lock();
            let Some(stream) = guard.as_mut() else {
                continue;
            };

            let mut bytes = 0u64;
            let mut result = Ok(());
            for (i, packet) in packets.iter().enumerate() {
                match send(stream, packet) {
                    Ok(n) => bytes += n as u64,
                    Err(e) => {
                        stream.skip(packets.len() - i - 1);
                        result = Err(e);
                        break;
                    }
                }
            }
            // The report carries this frame's timestamp, so it goes out first.
            if result.is_ok() {
                stream.send_report_if_due(now);
            }
            stream.advance_timestamp(timestamp_step);
            self.stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);

            match result {
                Ok(()) => delivered += 1,
                Err(e) if stream.interleaved_channels().is_some() => {
                    drop(guard);
                    tracing::warn!(
                        session_id = %session.id(),
                        ?track,
                        error = %e,
                        "interleaved send failed, closing session"
                    );
                    session.close();
                }
                Err(e) => tracing::warn!(
                    session_id = %session.id(),
                    ?track,
                    error = %e,
                    "send failed, rest of frame skipped"
                ),
            }
        }

        tracing::trace!(?track, packets = packets.len(), sessions = delivered, "frame delivered");
        delivered
    }

    /// Video pull loop; runs until `running` is cleared.
    pub fn run_video(&self, source: &mut dyn VideoSource, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match source.get_frame(FRAME_TIMEOUT) {
                Ok(Some(frame)) => {
                    self.deliver_video(&frame.data);
                    source.release_frame(frame);
                }
                Ok(None) => thread::sleep(IDLE_SLEEP),
                Err(e) => {
                    tracing::warn!(error = %e, "video capture error");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        tracing::debug!("video fan-out exited");
    }

    /// Audio pull loop: read PCM, encode, deliver.
    pub fn run_audio(&self, pipeline: &mut AudioPipeline, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let pcm = match pipeline.source.read_frame(FRAME_TIMEOUT) {
                Ok(Some(pcm)) => pcm,
                Ok(None) => {
                    thread::sleep(IDLE_SLEEP);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "audio capture error");
                    thread::sleep(ERROR_BACKOFF);
                    continue;
                }
            };
            match pipeline.encoder.encode(&pcm.samples) {
                Ok(encoded) => {
                    self.deliver_audio(&encoded);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "audio encode error");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        tracing::debug!("audio fan-out exited");
    }
}
