//! Software test-pattern capture device.
//!
//! Produces a paced stream of well-formed Annex-B access units (SPS + PPS +
//! IDR every GOP, P slices in between) sized to the configured bitrate, and
//! a 440 Hz tone for the audio track. The slice payloads are filler, so a
//! decoder will show garbage, but every RTP/RTSP path is exercised exactly
//! as with a real encoder.

use std::thread;
use std::time::{Duration, Instant};

use super::{
    AudioPipeline, AudioSource, CaptureDevice, CaptureError, CaptureResult, PcmFrame,
    VideoFrame, VideoSource,
};
use crate::config::{AudioCodec, AudioConfig, VideoConfig};
use crate::media::g711::G711Encoder;

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 8000.0;

/// Capture device that needs no hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestPatternDevice;

impl TestPatternDevice {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureDevice for TestPatternDevice {
    fn open_video(&self, config: &VideoConfig) -> CaptureResult<Box<dyn VideoSource>> {
        let source = TestPatternVideo::new(config)?;
        tracing::info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_kbps = config.bitrate_kbps,
            "test-pattern video opened"
        );
        Ok(Box::new(source))
    }

    fn open_audio(&self, config: &AudioConfig) -> CaptureResult<AudioPipeline> {
        if config.codec == AudioCodec::Aac {
            return Err(CaptureError::Unsupported(
                "test-pattern device has no AAC encoder".to_string(),
            ));
        }
        tracing::info!(codec = ?config.codec, sample_rate = config.sample_rate, "test-pattern audio opened");
        Ok(AudioPipeline {
            source: Box::new(ToneSource::new(config)),
            encoder: Box::new(G711Encoder::new(config.codec)),
        })
    }
}

/// Fixed-rate clock: frame `n` is due at `start + n * interval`.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Block until the next tick if it falls within `timeout`.
    fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return false;
            }
            thread::sleep(wait);
        }
        // Fall behind gracefully instead of bursting to catch up.
        let next = due + self.interval;
        self.next_due = Some(next.max(Instant::now()));
        true
    }
}

struct TestPatternVideo {
    pacer: Pacer,
    sps: Vec<u8>,
    gop: u32,
    frame_bytes: usize,
    frame_index: u64,
    recycled: Option<Vec<u8>>,
}

impl TestPatternVideo {
    fn new(config: &VideoConfig) -> CaptureResult<Self> {
        if config.fps == 0 {
            return Err(CaptureError::Unsupported("fps must be non-zero".to_string()));
        }
        let profile = parse_profile_level_id(&config.profile_level_id).ok_or_else(|| {
            CaptureError::Unsupported(format!(
                "bad profile-level-id {:?}",
                config.profile_level_id
            ))
        })?;
        let mut sps = vec![0x67];
        sps.extend_from_slice(&profile);
        sps.extend_from_slice(&[0xDA, 0x01, 0x40, 0x16, 0xE8]);

        let bytes_per_second = config.bitrate_kbps as usize * 1000 / 8;
        let frame_bytes = (bytes_per_second / config.fps as usize).max(64);

        Ok(Self {
            pacer: Pacer::new(Duration::from_secs(1) / config.fps),
            sps,
            gop: config.gop.max(1),
            frame_bytes,
            frame_index: 0,
            recycled: None,
        })
    }

    fn build_frame(&mut self) -> VideoFrame {
        let keyframe = self.frame_index % u64::from(self.gop) == 0;
        let mut data = self.recycled.take().unwrap_or_default();
        data.clear();

        if keyframe {
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(&self.sps);
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(&PPS);
        }

        // IDR slices are larger than P slices, as with a real encoder.
        let (nal_header, size) = if keyframe {
            (0x65, self.frame_bytes * 3)
        } else {
            (0x41, self.frame_bytes)
        };
        data.extend_from_slice(&START_CODE);
        data.push(nal_header);
        // Filler never contains 0x00, so no start code can be emulated.
        let seed = self.frame_index as u8;
        data.extend((0..size).map(|i| 0x80 | (i as u8 ^ seed)));

        self.frame_index += 1;
        VideoFrame { data, keyframe }
    }
}

impl VideoSource for TestPatternVideo {
    fn get_frame(&mut self, timeout: Duration) -> CaptureResult<Option<VideoFrame>> {
        if !self.pacer.wait(timeout) {
            return Ok(None);
        }
        Ok(Some(self.build_frame()))
    }

    fn release_frame(&mut self, frame: VideoFrame) {
        self.recycled = Some(frame.data);
    }
}

impl Drop for TestPatternVideo {
    fn drop(&mut self) {
        tracing::debug!(frames = self.frame_index, "test-pattern video closed");
    }
}

struct ToneSource {
    pacer: Pacer,
    started: bool,
    samples_per_frame: usize,
    channels: usize,
    phase: f32,
    phase_step: f32,
}

impl ToneSource {
    fn new(config: &AudioConfig) -> Self {
        Self {
            pacer: Pacer::new(Duration::from_millis(20)),
            started: false,
            samples_per_frame: config.samples_per_frame(),
            channels: usize::from(config.channels.max(1)),
            phase: 0.0,
            phase_step: std::f32::consts::TAU * TONE_HZ / config.sample_rate as f32,
        }
    }
}

impl AudioSource for ToneSource {
    fn start(&mut self) -> CaptureResult<()> {
        self.started = true;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> CaptureResult<Option<PcmFrame>> {
        if !self.started {
            return Err(CaptureError::Device("audio capture not started".to_string()));
        }
        if !self.pacer.wait(timeout) {
            return Ok(None);
        }
        let mut samples = Vec::with_capacity(self.samples_per_frame * self.channels);
        for _ in 0..self.samples_per_frame {
            let value = (self.phase.sin() * TONE_AMPLITUDE) as i16;
            samples.extend(std::iter::repeat_n(value, self.channels));
            self.phase = (self.phase + self.phase_step) % std::f32::consts::TAU;
        }
        Ok(Some(PcmFrame { samples }))
    }
}

fn parse_profile_level_id(hex: &str) -> Option<[u8; 3]> {
    if hex.len() != 6 {
        return None;
    }
    let mut out = [0u8; 3];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}
