//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! One [`Session`] exists per accepted TCP connection. It tracks:
//!
//! - A unique session ID (16-digit hex, returned in the `Session` header).
//! - The protocol state: Init -> Ready -> Playing.
//! - The video RTP sub-session and, when audio is enabled and negotiated,
//!   the audio RTP sub-session ([`RtpStream`]).
//! - The control connection, shared with interleaved RTP delivery.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! accept          -> Init
//! SETUP (track0)  -> Ready
//! PLAY            -> Playing  (from Ready only)
//! PAUSE           -> Ready    (from Playing only)
//! TEARDOWN        -> inactive, connection closed
//! TCP disconnect  -> inactive, unlinked from the registry
//! ```
//!
//! The [`SessionRegistry`] is the only structure shared between the accept
//! thread, the session threads, the fan-out threads and `Server::stop`.

pub mod stream;
pub mod transport;

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

pub use stream::RtpStream;
pub use transport::TransportHeader;

/// Session timeout advertised in the `Session` header (RFC 2326 §12.37).
pub const SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP protocol state (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no video transport negotiated yet.
    Init,
    /// Video transport negotiated; PLAY is allowed.
    Ready,
    /// Media is being delivered.
    Playing,
}

/// Media track addressed by a SETUP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    /// `track1` anywhere in the URI selects audio; everything else is video.
    pub fn from_uri(uri: &str) -> Self {
        if uri.contains("track1") {
            Self::Audio
        } else {
            Self::Video
        }
    }

    /// Control attribute name used in SDP and `RTP-Info`.
    pub fn control(self) -> &'static str {
        match self {
            Self::Video => "track0",
            Self::Audio => "track1",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Video => Self::Audio,
            Self::Audio => Self::Video,
        }
    }
}

/// The client's RTSP connection, shared between the session thread
/// (responses) and the fan-out (interleaved RTP).
struct ControlChannel {
    writer: Arc<Mutex<TcpStream>>,
    socket: TcpStream,
}

/// A single client session.
pub struct Session {
    id: String,
    peer_addr: SocketAddr,
    state: RwLock<SessionState>,
    active: AtomicBool,
    last_cseq: Mutex<Option<String>>,
    uri: RwLock<Option<String>>,
    video: Mutex<Option<RtpStream>>,
    audio: Mutex<Option<RtpStream>>,
    control: Option<ControlChannel>,
}

impl Session {
    /// A session with no control connection. Interleaved transport is
    /// unavailable on such a session.
    pub fn new(id: String, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            state: RwLock::new(SessionState::Init),
            active: AtomicBool::new(true),
            last_cseq: Mutex::new(None),
            uri: RwLock::new(None),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            control: None,
        }
    }

    /// A session bound to an accepted RTSP connection.
    pub fn with_control(id: String, stream: &TcpStream) -> io::Result<Self> {
        let mut session = Self::new(id, stream.peer_addr()?);
        session.control = Some(ControlChannel {
            writer: Arc::new(Mutex::new(stream.try_clone()?)),
            socket: stream.try_clone()?,
        });
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let old = std::mem::replace(&mut *self.state.write(), state);
        tracing::debug!(session_id = %self.id, ?old, new = ?state, "state transition");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Active and in [`SessionState::Playing`]: eligible for fan-out.
    pub fn is_playing(&self) -> bool {
        self.is_active() && self.state() == SessionState::Playing
    }

    /// Stop accepting requests and media. The connection stays open so the
    /// pending response can still be written.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Deactivate and shut the control connection down, which unblocks the
    /// session thread's read.
    pub fn close(&self) {
        self.deactivate();
        if let Some(control) = &self.control {
            // Already closed by the peer is fine.
            let _ = control.socket.shutdown(Shutdown::Both);
        }
    }

    /// URI cached by the last DESCRIBE.
    pub fn uri(&self) -> Option<String> {
        self.uri.read().clone()
    }

    pub(crate) fn set_uri(&self, uri: &str) {
        *self.uri.write() = Some(uri.to_string());
    }

    pub fn last_cseq(&self) -> Option<String> {
        self.last_cseq.lock().clone()
    }

    pub(crate) fn set_last_cseq(&self, cseq: &str) {
        *self.last_cseq.lock() = Some(cseq.to_string());
    }

    /// `Session` response header value, e.g. `"0000000000000001;timeout=60"`.
    pub fn header_value(&self) -> String {
        format!("{};timeout={}", self.id, SESSION_TIMEOUT_SECS)
    }

    pub(crate) fn stream(&self, track: Track) -> &Mutex<Option<RtpStream>> {
        match track {
            Track::Video => &self.video,
            Track::Audio => &self.audio,
        }
    }

    pub fn has_track(&self, track: Track) -> bool {
        self.stream(track).lock().is_some()
    }

    /// `Transport` value of a negotiated track.
    pub fn transport(&self, track: Track) -> Option<String> {
        self.stream(track)
            .lock()
            .as_ref()
            .map(RtpStream::transport_header)
    }

    pub(crate) fn install_stream(&self, track: Track, stream: RtpStream) {
        let previous = self.stream(track).lock().replace(stream);
        if previous.is_some() {
            tracing::debug!(session_id = %self.id, ?track, "replaced existing RTP stream");
        }
    }

    /// Drop both RTP sub-sessions, closing their sockets.
    pub(crate) fn release_streams(&self) {
        self.video.lock().take();
        self.audio.lock().take();
    }

    pub(crate) fn control_writer(&self) -> Option<Arc<Mutex<TcpStream>>> {
        self.control.as_ref().map(|c| c.writer.clone())
    }

    /// Write bytes on the control connection, serialized with interleaved RTP.
    pub(crate) fn send_control(&self, bytes: &[u8]) -> io::Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no control connection"))?;
        let mut writer = control.writer.lock();
        writer.write_all(bytes)?;
        writer.flush()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

struct Entry {
    session: Arc<Session>,
    thread: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Entry>,
    /// Threads of sessions that unlinked themselves; joined by
    /// [`SessionRegistry::reap_finished`] or [`SessionRegistry::drain`].
    retired: Vec<JoinHandle<()>>,
}

/// Thread-safe registry of live sessions, owned by one server.
///
/// The lock is only held to mutate membership or to snapshot it; no socket
/// I/O ever happens under it.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session ID unique for this registry's lifetime.
    pub fn next_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{id:016X}")
    }

    pub fn insert(&self, session: Arc<Session>) {
        let mut inner = self.inner.lock();
        inner.sessions.insert(
            session.id().to_string(),
            Entry {
                session,
                thread: None,
            },
        );
        tracing::debug!(total_sessions = inner.sessions.len(), "session registered");
    }

    /// Hand the session thread's handle to the registry. If the session
    /// already unlinked itself, the handle is retired directly.
    pub fn attach_thread(&self, id: &str, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(entry) => entry.thread = Some(handle),
            None => inner.retired.push(handle),
        }
    }

    /// Remove a session from the registry. Called by the session's own
    /// thread on exit; its join handle is kept for the stop path.
    pub fn unlink(&self, id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let entry = inner.sessions.remove(id)?;
        if let Some(handle) = entry.thread {
            inner.retired.push(handle);
        }
        tracing::debug!(session_id = %id, total_sessions = inner.sessions.len(), "session unlinked");
        Some(entry.session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(id).map(|e| e.session.clone())
    }

    /// All registered sessions at this instant.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner
            .lock()
            .sessions
            .values()
            .map(|e| e.session.clone())
            .collect()
    }

    /// Sessions currently eligible for media delivery.
    pub fn playing(&self) -> Vec<Arc<Session>> {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|e| e.session.is_playing())
            .map(|e| e.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join retired session threads that have already exited.
    pub fn reap_finished(&self) -> usize {
        let finished: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            let (finished, pending) = std::mem::take(&mut inner.retired)
                .into_iter()
                .partition(|h| h.is_finished());
            inner.retired = pending;
            finished
        };
        let count = finished.len();
        for handle in finished {
            join_session_thread(handle);
        }
        count
    }

    /// Remove every session and return them together with every thread
    /// handle still owned by the registry (live and retired).
    pub fn drain(&self) -> (Vec<Arc<Session>>, Vec<JoinHandle<()>>) {
        let mut inner = self.inner.lock();
        let mut handles = std::mem::take(&mut inner.retired);
        let sessions = inner
            .sessions
            .drain()
            .map(|(_, entry)| {
                handles.extend(entry.thread);
                entry.session
            })
            .collect();
        (sessions, handles)
    }
}

pub(crate) fn join_session_thread(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::warn!("session thread panicked");
    }
}
