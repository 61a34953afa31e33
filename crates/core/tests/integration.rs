//! Black-box tests: a real server on loopback, driven by a minimal RTSP
//! client over TCP.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ipcam::capture::synthetic::TestPatternDevice;
use ipcam::capture::{AudioPipeline, CaptureDevice, CaptureError, VideoFrame, VideoSource};
use ipcam::{AudioCodec, AudioConfig, RtspError, Server, SessionState, StreamConfig, VideoConfig};

const TIMEOUT: Duration = Duration::from_secs(3);

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u32,
    uri: String,
}

impl Client {
    fn connect(server: &Server) -> Self {
        let addr = server.local_addr().unwrap();
        let stream = TcpStream::connect_timeout(&addr, TIMEOUT).expect("connect to server");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(TIMEOUT)).unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            cseq: 0,
            uri: format!("rtsp://127.0.0.1:{}/stream", addr.port()),
        }
    }

    fn send(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> io::Result<()> {
        self.cseq += 1;
        let mut request = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        self.writer.write_all(request.as_bytes())
    }

    fn request(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> Response {
        self.send(method, uri, headers).expect("send request");
        let response = self
            .read_response()
            .expect("read response")
            .expect("connection closed before response");
        assert_eq!(
            response.header("CSeq"),
            Some(self.cseq.to_string().as_str()),
            "CSeq must be echoed"
        );
        assert!(response.header("Server").is_some());
        response
    }

    /// Next `$` frame as `(channel, payload)`.
    fn read_interleaved(&mut self) -> io::Result<(u8, Vec<u8>)> {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head)?;
        assert_eq!(head[0], b'$', "expected an interleaved frame");
        let mut payload = vec![0u8; usize::from(u16::from_be_bytes([head[2], head[3]]))];
        self.reader.read_exact(&mut payload)?;
        Ok((head[1], payload))
    }

    /// Next RTSP response, skipping interleaved media. `Ok(None)` on EOF.
    fn read_response(&mut self) -> io::Result<Option<Response>> {
        loop {
            let first = self.reader.fill_buf()?.first().copied();
            match first {
                None => return Ok(None),
                Some(b'$') => {
                    self.read_interleaved()?;
                }
                Some(_) => break,
            }
        }

        let mut status_line = String::new();
        if self.reader.read_line(&mut status_line)? == 0 {
            return Ok(None);
        }
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status code");

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').expect("header line");
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut response = Response {
            status,
            headers,
            body: String::new(),
        };
        if let Some(len) = response.header("Content-Length").and_then(|v| v.parse().ok()) {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body)?;
            response.body = String::from_utf8(body).expect("utf-8 body");
        }
        Ok(Some(response))
    }

    fn track(&self, n: u8) -> String {
        format!("{}/track{n}", self.uri)
    }
}

fn config(audio: Option<AudioConfig>) -> StreamConfig {
    StreamConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        audio,
        video: VideoConfig {
            bitrate_kbps: 512,
            ..VideoConfig::default()
        },
        ..StreamConfig::default()
    }
}

fn start(config: StreamConfig) -> Server {
    let mut server = Server::new(config, Arc::new(TestPatternDevice::new()));
    server.start().expect("server start");
    server
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn rtp_info_seq(info: &str, track: &str) -> u16 {
    info.split(',')
        .find(|part| part.contains(track))
        .and_then(|part| part.split(';').find_map(|p| p.strip_prefix("seq=")))
        .and_then(|seq| seq.parse().ok())
        .expect("seq in RTP-Info")
}

#[test]
fn udp_handshake_delivers_rtp() {
    let server = start(config(None));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();

    let options = client.request("OPTIONS", &uri, &[]);
    assert_eq!(options.status, 200);
    assert!(options.header("Public").unwrap().contains("DESCRIBE"));

    let describe = client.request("DESCRIBE", &uri, &[("Accept", "application/sdp")]);
    assert_eq!(describe.status, 200);
    assert_eq!(describe.header("Content-Type"), Some("application/sdp"));
    assert!(describe.body.starts_with("v=0\r\n"));
    assert!(describe.body.contains("c=IN IP4 127.0.0.1\r\n"));
    assert!(describe.body.contains("m=video 0 RTP/AVP 96\r\n"));
    assert!(describe.body.contains("a=control:track0\r\n"));
    assert!(!describe.body.contains("m=audio"));

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(TIMEOUT)).unwrap();
    let ports = format!(
        "RTP/AVP;unicast;client_port={}-{}",
        rtp.local_addr().unwrap().port(),
        rtcp.local_addr().unwrap().port()
    );
    let setup = client.request("SETUP", &client.track(0), &[("Transport", &ports)]);
    assert_eq!(setup.status, 200);
    assert!(setup.header("Transport").unwrap().contains(";server_port="));
    let session = setup.header("Session").unwrap().to_string();
    assert!(session.ends_with(";timeout=60"));
    let session_id = session.split(';').next().unwrap().to_string();
    assert_eq!(session_id.len(), 16);

    let play = client.request("PLAY", &uri, &[("Session", &session_id)]);
    assert_eq!(play.status, 200);
    assert_eq!(play.header("Range"), Some("npt=0.000-"));
    let info = play.header("RTP-Info").unwrap();
    assert!(info.starts_with(&format!("url={uri}/track0;seq=")));
    let first_seq = rtp_info_seq(info, "track0");

    let mut packet = [0u8; 2048];
    let (n, _) = rtp.recv_from(&mut packet).expect("RTP packet");
    assert!(n > 12);
    assert_eq!(packet[0] >> 6, 2, "RTP version");
    assert_eq!(packet[1] & 0x7F, 96);
    assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), first_seq);

    let viewers = server.viewers();
    assert_eq!(viewers.len(), 1);
    assert_eq!(viewers[0].session_id, session_id);
    assert_eq!(viewers[0].state, SessionState::Playing);
    assert!(viewers[0].transport.as_deref().unwrap().starts_with("RTP/AVP;unicast"));

    let teardown = client.request("TEARDOWN", &uri, &[("Session", &session_id)]);
    assert_eq!(teardown.status, 200);
    assert!(wait_for(|| server.session_count() == 0));
    assert!(server.stats().frames_sent > 0);
}

#[test]
fn interleaved_handshake_delivers_frames() {
    let server = start(config(Some(AudioConfig::g711(AudioCodec::Pcma))));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();

    let describe = client.request("DESCRIBE", &uri, &[]);
    assert!(describe.body.contains("a=rtpmap:8 PCMA/8000\r\n"));
    assert!(describe.body.contains("a=control:track1\r\n"));

    let video = client.request(
        "SETUP",
        &client.track(0),
        &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
    );
    assert_eq!(video.status, 200);
    assert_eq!(video.header("Transport"), Some("RTP/AVP/TCP;unicast;interleaved=0-1"));
    let session = video.header("Session").unwrap().to_string();

    let audio = client.request(
        "SETUP",
        &client.track(1),
        &[
            ("Transport", "RTP/AVP/TCP;unicast;interleaved=2-3"),
            ("Session", &session),
        ],
    );
    assert_eq!(audio.status, 200);

    let play = client.request("PLAY", &uri, &[("Session", &session)]);
    assert_eq!(play.status, 200);
    let info = play.header("RTP-Info").unwrap();
    assert!(info.contains("/track0;seq="));
    assert!(info.contains("/track1;seq="));

    let (mut video_packets, mut audio_packets) = (0, 0);
    let deadline = Instant::now() + TIMEOUT;
    while (video_packets == 0 || audio_packets == 0) && Instant::now() < deadline {
        let (channel, payload) = client.read_interleaved().expect("interleaved frame");
        match channel {
            0 => {
                assert_eq!(payload[1] & 0x7F, 96);
                video_packets += 1;
            }
            2 => {
                assert_eq!(payload[1] & 0x7F, 8);
                assert_eq!(payload.len(), 12 + 160);
                audio_packets += 1;
            }
            1 | 3 => assert_eq!(payload[1], 200, "RTCP sender report"),
            other => panic!("unexpected channel {other}"),
        }
    }
    assert!(video_packets > 0 && audio_packets > 0);
    assert!(server.stats().audio_frames_sent > 0);
}

#[test]
fn play_before_setup_is_rejected() {
    let server = start(config(None));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();

    let play = client.request("PLAY", &uri, &[]);
    assert_eq!(play.status, 405);

    // The session is still usable afterwards.
    let options = client.request("OPTIONS", &uri, &[]);
    assert_eq!(options.status, 200);
    assert_eq!(server.viewers()[0].state, SessionState::Init);
}

#[test]
fn malformed_request_gets_bad_request() {
    let server = start(config(None));
    let mut client = Client::connect(&server);

    client
        .writer
        .write_all(b"NONSENSE\r\nCSeq: 41\r\n\r\n")
        .unwrap();
    let response = client.read_response().unwrap().unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(response.header("CSeq"), Some("41"));

    let uri = client.uri.clone();
    assert_eq!(client.request("OPTIONS", &uri, &[]).status, 200);
}

#[test]
fn oversized_request_is_dropped_and_connection_survives() {
    let server = start(config(None));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();

    // Twice the receive buffer with no header terminator.
    client.writer.write_all(&[b'A'; 8192]).unwrap();
    thread::sleep(Duration::from_millis(100));

    // Leftovers past the last reset may still be glued to the next request,
    // so only the one after it is guaranteed a clean 200.
    client.send("OPTIONS", &uri, &[]).unwrap();
    assert!(client.read_response().unwrap().is_some());
    assert_eq!(client.request("OPTIONS", &uri, &[]).status, 200);
    assert_eq!(server.session_count(), 1);
}

#[test]
fn teardown_closes_connection() {
    let server = start(config(None));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();

    let setup = client.request(
        "SETUP",
        &client.track(0),
        &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
    );
    let session = setup.header("Session").unwrap().to_string();

    let teardown = client.request("TEARDOWN", &uri, &[("Session", &session)]);
    assert_eq!(teardown.status, 200);

    // The second TEARDOWN has nowhere to go: the server closed the socket.
    let second = client
        .send("TEARDOWN", &uri, &[("Session", &session)])
        .and_then(|()| client.read_response());
    assert!(!matches!(second, Ok(Some(_))));
    assert!(wait_for(|| server.session_count() == 0));
}

#[test]
fn stop_disconnects_clients() {
    let mut server = start(config(None));
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();
    assert_eq!(client.request("OPTIONS", &uri, &[]).status, 200);
    assert_eq!(server.session_count(), 1);

    server.stop();
    assert_eq!(server.session_count(), 0);
    assert!(matches!(client.read_response(), Ok(None) | Err(_)));
}

/// Video source that records when it is dropped.
struct TrackedVideo {
    dropped: Arc<AtomicBool>,
}

impl VideoSource for TrackedVideo {
    fn get_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>, CaptureError> {
        thread::sleep(timeout);
        Ok(None)
    }

    fn release_frame(&mut self, _frame: VideoFrame) {}
}

impl Drop for TrackedVideo {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

struct BrokenAudioDevice {
    video_dropped: Arc<AtomicBool>,
}

impl CaptureDevice for BrokenAudioDevice {
    fn open_video(&self, _config: &VideoConfig) -> Result<Box<dyn VideoSource>, CaptureError> {
        Ok(Box::new(TrackedVideo {
            dropped: self.video_dropped.clone(),
        }))
    }

    fn open_audio(&self, _config: &AudioConfig) -> Result<AudioPipeline, CaptureError> {
        Err(CaptureError::Device("no microphone".to_string()))
    }
}

#[test]
fn failed_start_releases_everything() {
    let port = free_port();
    let video_dropped = Arc::new(AtomicBool::new(false));
    let device = BrokenAudioDevice {
        video_dropped: video_dropped.clone(),
    };
    let config = StreamConfig {
        port,
        ..config(Some(AudioConfig::g711(AudioCodec::Pcmu)))
    };

    let mut server = Server::new(config, Arc::new(device));
    let err = server.start().unwrap_err();
    assert!(matches!(err, RtspError::Capture(CaptureError::Device(_))));
    assert!(!server.is_running());
    assert!(video_dropped.load(Ordering::SeqCst), "video source must be closed");

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    TcpListener::bind(addr).expect("listener released");
}

#[test]
fn restart_after_stop() {
    let port = free_port();
    let mut server = Server::new(
        StreamConfig {
            port,
            ..config(None)
        },
        Arc::new(TestPatternDevice::new()),
    );

    server.start().unwrap();
    assert!(matches!(server.start(), Err(RtspError::AlreadyRunning)));
    server.stop();
    assert!(!server.is_running());

    server.start().expect("restart on the same port");
    assert_eq!(server.local_addr().unwrap().port(), port);
    let mut client = Client::connect(&server);
    let uri = client.uri.clone();
    assert_eq!(client.request("OPTIONS", &uri, &[]).status, 200);
}
