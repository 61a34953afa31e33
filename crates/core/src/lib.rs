pub mod capture;
pub mod config;
pub mod error;
pub mod fanout;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use capture::{CaptureDevice, CaptureError};
pub use config::{AudioCodec, AudioConfig, StreamConfig, VideoConfig};
pub use error::{Result, RtspError};
pub use fanout::StatsSnapshot;
pub use server::{Server, Viewer};
pub use session::SessionState;
