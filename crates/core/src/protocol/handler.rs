use std::sync::Arc;

use crate::media::rtp::RtpHeader;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::StreamContext;
use crate::session::transport::TransportHeader;
use crate::session::{RtpStream, Session, SessionState, Track};
use crate::transport::{InterleavedSink, MediaSink, UdpSink};

/// Methods advertised in `Public` (OPTIONS) and `Allow` (405).
pub const PUBLIC_METHODS: &str =
    "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER";

/// Handles RTSP method requests for a single TCP connection.
///
/// Each connection owns exactly one [`Session`]; the handler drives its
/// state machine and installs its RTP sub-sessions at SETUP.
pub struct MethodHandler {
    session: Arc<Session>,
    context: Arc<StreamContext>,
}

impl MethodHandler {
    pub fn new(session: Arc<Session>, context: Arc<StreamContext>) -> Self {
        MethodHandler { session, context }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");
        self.session.set_last_cseq(cseq);

        if let Some(id) = request.session_id()
            && id != self.session.id()
        {
            tracing::warn!(%cseq, requested = id, session_id = %self.session.id(), "request for foreign session");
            return RtspResponse::session_not_found().with_cseq(cseq);
        }

        let response = match request.method.as_str() {
            "OPTIONS" => self.handle_options(),
            "DESCRIBE" => self.handle_describe(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "PAUSE" => self.handle_pause(),
            "TEARDOWN" => self.handle_teardown(),
            "GET_PARAMETER" => self.handle_get_parameter(),
            "SET_PARAMETER" => self.handle_set_parameter(request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::method_not_allowed().add_header("Allow", PUBLIC_METHODS)
            }
        };
        response.with_cseq(cseq)
    }

    fn handle_options(&self) -> RtspResponse {
        RtspResponse::ok().add_header("Public", PUBLIC_METHODS)
    }

    fn serves(&self, uri: &str) -> bool {
        stream_path(uri) == self.context.config.path.trim_end_matches('/')
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let uri = request.uri.as_str();
        if !self.serves(uri) {
            tracing::warn!(uri, "DESCRIBE for unknown stream");
            return RtspResponse::not_found();
        }
        self.session.set_uri(uri);

        let body = sdp::generate_sdp(
            &self.context.config,
            &self.context.parameter_sets,
            &self.context.host,
            self.context.origin,
        );
        let content_base = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{uri}/")
        };

        RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base)
            .with_body(body)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let uri = request.uri.as_str();
        if !self.serves(uri) {
            tracing::warn!(uri, "SETUP for unknown stream");
            return RtspResponse::not_found();
        }

        let track = Track::from_uri(uri);
        let payload_type = match (track, &self.context.config.audio) {
            (Track::Video, _) => self.context.config.video.payload_type,
            (Track::Audio, Some(audio)) => audio.payload_type(),
            (Track::Audio, None) => {
                tracing::warn!(uri, "SETUP for audio track with audio disabled");
                return RtspResponse::not_found();
            }
        };

        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!("SETUP missing Transport header");
            return RtspResponse::bad_request();
        };
        let Some(transport) = TransportHeader::parse(transport_header) else {
            tracing::warn!(transport_header, "SETUP invalid Transport header");
            return RtspResponse::bad_request();
        };

        let sink: Box<dyn MediaSink> = match transport {
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => match UdpSink::bind(self.session.peer_addr().ip(), client_rtp_port, client_rtcp_port) {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind RTP/RTCP sockets");
                    return RtspResponse::internal_error();
                }
            },
            TransportHeader::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                if self.channels_collide(track, rtp_channel, rtcp_channel) {
                    tracing::warn!(rtp_channel, rtcp_channel, "interleaved channels already in use");
                    return RtspResponse::bad_request();
                }
                let Some(writer) = self.session.control_writer() else {
                    tracing::error!("interleaved SETUP without a control connection");
                    return RtspResponse::internal_error();
                };
                Box::new(InterleavedSink::new(writer, rtp_channel, rtcp_channel))
            }
        };

        let ssrc = self.unique_ssrc(track);
        let stream = RtpStream::new(RtpHeader::randomized(payload_type, ssrc), sink);
        let transport_value = stream.transport_header();
        self.session.install_stream(track, stream);

        if track == Track::Video {
            self.session.set_state(SessionState::Ready);
        }

        tracing::info!(
            session_id = %self.session.id(),
            ?track,
            transport = %transport_value,
            ssrc = format_args!("{:#010X}", ssrc),
            "session track set up"
        );

        RtspResponse::ok()
            .add_header("Transport", &transport_value)
            .add_header("Session", &self.session.header_value())
    }

    /// Overlap with the channel pair of the other track on this connection.
    fn channels_collide(&self, track: Track, rtp: u8, rtcp: u8) -> bool {
        self.session
            .stream(track.other())
            .lock()
            .as_ref()
            .and_then(RtpStream::interleaved_channels)
            .is_some_and(|(a, b)| [a, b].iter().any(|c| *c == rtp || *c == rtcp))
    }

    /// Random SSRC distinct from the other track's.
    fn unique_ssrc(&self, track: Track) -> u32 {
        let other = self
            .session
            .stream(track.other())
            .lock()
            .as_ref()
            .map(RtpStream::ssrc);
        loop {
            let ssrc: u32 = rand::random();
            if Some(ssrc) != other {
                return ssrc;
            }
        }
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let state = self.session.state();
        if state != SessionState::Ready {
            tracing::warn!(session_id = %self.session.id(), ?state, "PLAY outside READY");
            return RtspResponse::method_not_allowed();
        }

        let uri = self.session.uri().unwrap_or_else(|| request.uri.clone());
        let base = base_uri(&uri);

        // Sequence and timestamp only move once the session is PLAYING, so
        // these are the values of the first packet the client will see.
        let rtp_info = [Track::Video, Track::Audio]
            .into_iter()
            .filter_map(|track| {
                self.session.stream(track).lock().as_ref().map(|stream| {
                    format!(
                        "url={base}/{};seq={};rtptime={}",
                        track.control(),
                        stream.sequence(),
                        stream.timestamp()
                    )
                })
            })
            .collect::<Vec<_>>()
            .join(",");

        self.session.set_state(SessionState::Playing);
        tracing::info!(session_id = %self.session.id(), "session started playing");

        RtspResponse::ok()
            .add_header("Session", &self.session.header_value())
            .add_header("Range", "npt=0.000-")
            .add_header("RTP-Info", &rtp_info)
    }

    fn handle_pause(&mut self) -> RtspResponse {
        let state = self.session.state();
        if state != SessionState::Playing {
            tracing::warn!(session_id = %self.session.id(), ?state, "PAUSE outside PLAYING");
            return RtspResponse::method_not_allowed();
        }
        self.session.set_state(SessionState::Ready);
        tracing::info!(session_id = %self.session.id(), "session paused");
        RtspResponse::ok().add_header("Session", &self.session.header_value())
    }

    fn handle_teardown(&mut self) -> RtspResponse {
        self.session.deactivate();
        tracing::info!(session_id = %self.session.id(), "session terminated via TEARDOWN");
        RtspResponse::ok().add_header("Session", &self.session.header_value())
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self) -> RtspResponse {
        tracing::trace!(session_id = %self.session.id(), "GET_PARAMETER keepalive");
        RtspResponse::ok().add_header("Session", &self.session.header_value())
    }

    fn handle_set_parameter(&self, request: &RtspRequest) -> RtspResponse {
        tracing::debug!(
            session_id = %self.session.id(),
            body = request.body.as_deref().unwrap_or(""),
            "SET_PARAMETER ignored"
        );
        RtspResponse::ok().add_header("Session", &self.session.header_value())
    }
}

/// Stream path of a request URI, without query, trailing `/` or `/trackN`.
///
/// `rtsp://10.0.0.1:554/stream/track1?x=1` gives `/stream`. A URI with no
/// path gives the empty string.
pub fn stream_path(uri: &str) -> &str {
    let uri = uri.split(['?', '#']).next().unwrap_or(uri);
    let path = match uri.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |slash| &rest[slash..]),
        None => uri,
    };
    base_uri(path).trim_end_matches('/')
}

/// URI with a trailing `/trackN` removed.
fn base_uri(uri: &str) -> &str {
    let uri = uri.trim_end_matches('/');
    match uri.rsplit_once('/') {
        Some((base, last)) if is_track_segment(last) => base,
        _ => uri,
    }
}

fn is_track_segment(segment: &str) -> bool {
    segment
        .strip_prefix("track")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
