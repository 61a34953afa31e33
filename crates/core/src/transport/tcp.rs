use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::protocol::framing::RequestBuffer;
use crate::protocol::request::scan_cseq;
use crate::protocol::{MethodHandler, RtspRequest, RtspResponse};
use crate::server::StreamContext;
use crate::session::{Session, SessionRegistry};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);
const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 4096;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
/// Session threads that exited on their own are joined here as well.
pub fn accept_loop(
    listener: TcpListener,
    registry: SessionRegistry,
    context: Arc<StreamContext>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        if let Some(pause) = accept_next(&listener, &registry, &context, &running) {
            thread::sleep(pause);
        }
    }
    tracing::debug!("accept loop exited");
}

/// Accept at most one client. Returns how long to wait before the next
/// attempt, or `None` to retry straight away.
fn accept_next(
    listener: &TcpListener,
    registry: &SessionRegistry,
    context: &Arc<StreamContext>,
    running: &AtomicBool,
) -> Option<Duration> {
    match listener.accept() {
        Ok((stream, peer_addr)) => {
            spawn_session(stream, peer_addr, registry, context);
            None
        }
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
            registry.reap_finished();
            Some(ACCEPT_POLL_INTERVAL)
        }
        Err(ref e) if e.kind() == ErrorKind::Interrupted => None,
        Err(e) => {
            // Persistent failures such as fd exhaustion: joining finished
            // sessions may free descriptors.
            if running.load(Ordering::SeqCst) {
                tracing::warn!(error = %e, "TCP accept error");
            }
            registry.reap_finished();
            Some(ACCEPT_ERROR_BACKOFF)
        }
    }
}

fn spawn_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: &SessionRegistry,
    context: &Arc<StreamContext>,
) {
    let configured = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_nodelay(true))
        .and_then(|()| stream.set_write_timeout(Some(CONTROL_WRITE_TIMEOUT)));
    if let Err(e) = configured {
        tracing::warn!(%peer_addr, error = %e, "failed to configure client socket");
        return;
    }

    let session = match Session::with_control(registry.next_id(), &stream) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            tracing::warn!(%peer_addr, error = %e, "failed to set up client session");
            return;
        }
    };
    let id = session.id().to_string();
    registry.insert(session.clone());

    let spawned = {
        let registry = registry.clone();
        let context = context.clone();
        let session = session.clone();
        thread::Builder::new()
            .name(format!("rtsp-{id}"))
            .spawn(move || Connection::handle(stream, session, registry, context))
    };

    match spawned {
        Ok(handle) => registry.attach_thread(&id, handle),
        Err(e) => {
            tracing::error!(%peer_addr, session_id = %id, error = %e, "failed to spawn session thread");
            registry.unlink(&id);
            session.close();
        }
    }
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: TcpStream,
    buffer: RequestBuffer,
    handler: MethodHandler,
    session: Arc<Session>,
}

impl Connection {
    /// Entry point: run the request loop, then unlink the session.
    fn handle(
        stream: TcpStream,
        session: Arc<Session>,
        registry: SessionRegistry,
        context: Arc<StreamContext>,
    ) {
        let peer_addr = session.peer_addr();
        tracing::info!(%peer_addr, session_id = %session.id(), "client connected");

        let mut conn = Connection {
            reader: stream,
            buffer: RequestBuffer::new(),
            handler: MethodHandler::new(session.clone(), context),
            session,
        };

        let reason = conn.run();

        conn.session.close();
        conn.session.release_streams();
        registry.unlink(conn.session.id());

        tracing::info!(%peer_addr, session_id = %conn.session.id(), reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self) -> &'static str {
        let mut chunk = [0u8; READ_CHUNK];
        while self.session.is_active() {
            let n = match self.reader.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) if !self.session.is_active() => break,
                Err(_) => return "read error",
            };
            self.buffer.extend(&chunk[..n]);

            while let Some(message) = self.buffer.next_message() {
                if let Err(reason) = self.respond(&message) {
                    return reason;
                }
                if !self.session.is_active() {
                    return "session torn down";
                }
            }

            if self.buffer.is_full() {
                tracing::warn!(
                    peer = %self.session.peer_addr(),
                    buffered = self.buffer.len(),
                    "request exceeds buffer without terminator, dropping"
                );
                self.buffer.reset();
            }
        }
        "session closed"
    }

    fn respond(&mut self, message: &[u8]) -> Result<(), &'static str> {
        let response = match RtspRequest::parse_bytes(message) {
            Ok(request) => {
                tracing::debug!(
                    peer = %self.session.peer_addr(),
                    method = %request.method,
                    uri = %request.uri,
                    version = %request.version,
                    "request"
                );
                self.handler.handle(&request)
            }
            Err(e) => {
                tracing::warn!(peer = %self.session.peer_addr(), error = %e, "parse error");
                let cseq = scan_cseq(message).unwrap_or_else(|| "0".to_string());
                RtspResponse::bad_request().with_cseq(&cseq)
            }
        };

        tracing::debug!(
            peer = %self.session.peer_addr(),
            status = response.status_code,
            "response"
        );

        self.session
            .send_control(response.serialize().as_bytes())
            .map_err(|_| "write error")
    }
}
