use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::{AudioPipeline, CaptureDevice, VideoSource};
use crate::config::StreamConfig;
use crate::error::{Result, RtspError};
use crate::fanout::{FanOut, StatsSnapshot, StreamStats};
use crate::media::h264::ParameterSets;
use crate::session::{SessionRegistry, SessionState, Track, join_session_thread};
use crate::transport::{self, tcp};

/// Per-run values shared by every connection's protocol handler.
#[derive(Debug)]
pub struct StreamContext {
    pub(crate) config: StreamConfig,
    pub(crate) parameter_sets: Arc<ParameterSets>,
    /// Host advertised in SDP `o=`/`c=` and in the stream URL.
    pub(crate) host: String,
    /// SDP origin session id and version: server start time in Unix seconds.
    pub(crate) origin: u64,
}

impl StreamContext {
    pub fn new(
        config: StreamConfig,
        parameter_sets: Arc<ParameterSets>,
        host: String,
        origin: u64,
    ) -> Self {
        Self {
            config,
            parameter_sets,
            host,
            origin,
        }
    }
}

/// Threads and capture handles owned by a running server.
struct Running {
    local_addr: SocketAddr,
    context: Arc<StreamContext>,
    accept: JoinHandle<()>,
    video: JoinHandle<Box<dyn VideoSource>>,
    audio: Option<JoinHandle<AudioPipeline>>,
}

/// High-level RTSP server orchestrator.
///
/// Owns the listener, the session registry, the SPS/PPS cache and the
/// capture pipeline for one stream. [`start`](Self::start) brings up the
/// accept thread and the fan-out threads; [`stop`](Self::stop) tears all
/// of it down and joins every thread it spawned, session threads included.
pub struct Server {
    config: StreamConfig,
    device: Arc<dyn CaptureDevice>,
    registry: SessionRegistry,
    parameter_sets: Arc<ParameterSets>,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    state: Option<Running>,
}

impl Server {
    pub fn new(config: StreamConfig, device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            config,
            device,
            registry: SessionRegistry::new(),
            parameter_sets: Arc::new(ParameterSets::new()),
            stats: Arc::new(StreamStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            state: None,
        }
    }

    /// Validate the configuration, bind the listener, open the capture
    /// pipeline and spawn the worker threads.
    ///
    /// Nothing is left behind on failure: already-opened capture handles
    /// are dropped and already-spawned threads are joined before the error
    /// is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Err(RtspError::AlreadyRunning);
        }
        self.config.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let video_source = self.device.open_video(&self.config.video)?;
        let audio_pipeline = match &self.config.audio {
            Some(audio) => {
                let mut pipeline = self.device.open_audio(audio)?;
                pipeline.source.start()?;
                Some(pipeline)
            }
            None => None,
        };

        let context = Arc::new(StreamContext::new(
            self.config.clone(),
            self.parameter_sets.clone(),
            self.advertised_host(local_addr),
            unix_now(),
        ));
        let fanout = FanOut::new(
            &self.config,
            self.registry.clone(),
            self.parameter_sets.clone(),
            self.stats.clone(),
        );

        self.running.store(true, Ordering::SeqCst);
        let spawned = self.spawn_workers(listener, context.clone(), fanout, video_source, audio_pipeline);
        let (accept, video, audio) = match spawned {
            Ok(handles) => handles,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.close_sessions();
                return Err(e);
            }
        };

        tracing::info!(
            addr = %local_addr,
            url = %stream_url(&context, local_addr),
            audio = self.config.audio.is_some(),
            "RTSP server listening"
        );

        self.state = Some(Running {
            local_addr,
            context,
            accept,
            video,
            audio,
        });
        Ok(())
    }

    /// Spawn accept, video and audio threads. If a later spawn fails, the
    /// threads already started are joined before returning.
    #[allow(clippy::type_complexity)]
    fn spawn_workers(
        &self,
        listener: TcpListener,
        context: Arc<StreamContext>,
        fanout: FanOut,
        mut video_source: Box<dyn VideoSource>,
        audio_pipeline: Option<AudioPipeline>,
    ) -> Result<(
        JoinHandle<()>,
        JoinHandle<Box<dyn VideoSource>>,
        Option<JoinHandle<AudioPipeline>>,
    )> {
        let accept = {
            let registry = self.registry.clone();
            let running = self.running.clone();
            thread::Builder::new()
                .name("rtsp-accept".to_string())
                .spawn(move || tcp::accept_loop(listener, registry, context, running))?
        };

        let video = {
            let fanout = fanout.clone();
            let running = self.running.clone();
            thread::Builder::new()
                .name("video-fanout".to_string())
                .spawn(move || {
                    fanout.run_video(video_source.as_mut(), &running);
                    video_source
                })
        };
        let video = match video {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                join_worker(accept, "accept");
                return Err(e.into());
            }
        };

        let audio = match audio_pipeline {
            Some(mut pipeline) => {
                let running = self.running.clone();
                let spawned = thread::Builder::new()
                    .name("audio-fanout".to_string())
                    .spawn(move || {
                        fanout.run_audio(&mut pipeline, &running);
                        pipeline
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        join_worker(accept, "accept");
                        join_worker(video, "video fan-out");
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        Ok((accept, video, audio))
    }

    /// Stop the server and release everything `start` acquired.
    ///
    /// Order: clear the running flag, join the accept and fan-out threads,
    /// close and join every session, then close the capture pipeline.
    /// Calling `stop` on a stopped server does nothing.
    pub fn stop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        tracing::info!("server stopping");
        self.running.store(false, Ordering::SeqCst);

        join_worker(state.accept, "accept");
        let video_source = state.video.join();
        if video_source.is_err() {
            tracing::warn!("video fan-out thread panicked");
        }
        let audio_pipeline = state.audio.map(JoinHandle::join);
        if matches!(audio_pipeline, Some(Err(_))) {
            tracing::warn!("audio fan-out thread panicked");
        }

        let closed = self.close_sessions();

        drop(audio_pipeline);
        drop(video_source);
        tracing::info!(sessions = closed, "server stopped");
    }

    /// Close every registered session and join its thread.
    fn close_sessions(&self) -> usize {
        let (sessions, handles) = self.registry.drain();
        for session in &sessions {
            session.close();
        }
        for handle in handles {
            join_session_thread(handle);
        }
        for session in &sessions {
            session.release_streams();
        }
        sessions.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// Address the listener is bound to; useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.state
            .as_ref()
            .map(|s| s.local_addr)
            .ok_or(RtspError::NotStarted)
    }

    /// `rtsp://<host>:<port><path>` as advertised to clients.
    pub fn stream_url(&self) -> Result<String> {
        self.state
            .as_ref()
            .map(|s| stream_url(&s.context, s.local_addr))
            .ok_or(RtspError::NotStarted)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cached SPS/PPS, populated from the first keyframe.
    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.parameter_sets
    }

    /// Connected clients and their negotiated video transport.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.registry
            .snapshot()
            .iter()
            .filter(|session| session.is_active())
            .map(|session| Viewer {
                session_id: session.id().to_string(),
                peer_addr: session.peer_addr(),
                state: session.state(),
                transport: session.transport(Track::Video),
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    fn advertised_host(&self, local_addr: SocketAddr) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        match local_addr.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip.to_string(),
            _ => transport::local_ipv4()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A client connected to the server.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    /// Video `Transport` value, once SETUP has succeeded.
    pub transport: Option<String>,
}

fn stream_url(context: &StreamContext, local_addr: SocketAddr) -> String {
    format!(
        "rtsp://{}:{}{}",
        context.host,
        local_addr.port(),
        context.config.path
    )
}

fn join_worker<T>(handle: JoinHandle<T>, name: &str) {
    if handle.join().is_err() {
        tracing::warn!(thread = name, "worker thread panicked");
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
