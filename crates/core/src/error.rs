//! Error types for the streaming engine.

use std::fmt;

use crate::capture::CaptureError;

/// Errors surfaced by the public API.
///
/// Variants map to the layer that failed:
///
/// - **Protocol**: [`Parse`](Self::Parse) for malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io) for socket, bind and thread-spawn failures.
/// - **Capture**: [`Capture`](Self::Capture) when the encoder pipeline cannot be opened.
/// - **Server**: [`InvalidConfig`](Self::InvalidConfig),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`NotStarted`](Self::NotStarted).
///
/// Failures inside a single client session never become an `RtspError`;
/// they are answered with an RTSP status code or logged.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The stream configuration was rejected by [`StreamConfig::validate`](crate::StreamConfig::validate).
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// The capture/encode service failed to open or start.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The operation needs a running server.
    #[error("server not started")]
    NotStarted,
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The header block was not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidUtf8 => write!(f, "request is not valid UTF-8"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
