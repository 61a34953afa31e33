//! Capture/encode service contracts.
//!
//! The engine never talks to camera hardware directly. A [`CaptureDevice`]
//! opens a video encoder channel (and optionally an audio pipeline); the
//! fan-out threads then pull frames from it:
//!
//! ```text
//! CaptureDevice::open_video ──► VideoSource ──get_frame──► FanOut ──► sessions
//!                                    ▲                        │
//!                                    └──── release_frame ─────┘
//! ```
//!
//! Handles are closed on drop, so a `Server` that fails half-way through
//! `start()` releases whatever it already opened just by unwinding.
//!
//! [`synthetic`] provides a software test-pattern device.

pub mod synthetic;

use std::time::Duration;

use crate::config::{AudioConfig, VideoConfig};

/// Errors reported by a capture/encode service.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The device cannot produce the requested format.
    #[error("unsupported capture configuration: {0}")]
    Unsupported(String),

    /// Driver-level failure (open, stream request, encode).
    #[error("capture device failure: {0}")]
    Device(String),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// One encoded H.264 access unit in Annex-B format.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// 20 ms of interleaved 16-bit PCM.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
}

/// Hardware (or software) capture service shared by a [`Server`](crate::Server).
pub trait CaptureDevice: Send + Sync {
    /// Open the video encoder and request its output stream.
    fn open_video(&self, config: &VideoConfig) -> CaptureResult<Box<dyn VideoSource>>;

    /// Open the audio input and its encoder.
    fn open_audio(&self, config: &AudioConfig) -> CaptureResult<AudioPipeline>;
}

/// Pull interface of an open video encoder stream.
///
/// Only one frame is ever in flight: the caller releases each frame before
/// asking for the next one.
pub trait VideoSource: Send {
    /// Wait up to `timeout` for the next encoded frame. `Ok(None)` means no
    /// frame was ready, which is a routine condition.
    fn get_frame(&mut self, timeout: Duration) -> CaptureResult<Option<VideoFrame>>;

    /// Hand a frame back to the encoder once it has been delivered.
    fn release_frame(&mut self, frame: VideoFrame);
}

/// Raw PCM input.
pub trait AudioSource: Send {
    /// Begin capturing.
    fn start(&mut self) -> CaptureResult<()>;

    /// Wait up to `timeout` for the next PCM frame.
    fn read_frame(&mut self, timeout: Duration) -> CaptureResult<Option<PcmFrame>>;
}

/// PCM to codec payload.
pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> CaptureResult<Vec<u8>>;
}

/// An opened audio input paired with its encoder.
pub struct AudioPipeline {
    pub source: Box<dyn AudioSource>,
    pub encoder: Box<dyn AudioEncoder>,
}
