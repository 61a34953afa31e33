use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use ipcam::capture::synthetic::TestPatternDevice;
use ipcam::config::DEFAULT_MAX_PAYLOAD;
use ipcam::{AudioCodec, AudioConfig, Server, StreamConfig, VideoConfig};
use tracing_subscriber::filter::LevelFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AudioArg {
    Pcma,
    Pcmu,
    Aac,
}

#[derive(Parser)]
#[command(
    name = "ipcam-rtspd",
    about = "RTSP server streaming a test-pattern camera"
)]
struct Args {
    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Stream path
    #[arg(long, default_value = "/stream")]
    path: String,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Video bitrate in kbit/s
    #[arg(long, default_value_t = 2048)]
    bitrate: u32,

    /// Keyframe interval in frames
    #[arg(long, default_value_t = 50)]
    gop: u32,

    /// Enable an audio track
    #[arg(long, value_enum)]
    audio: Option<AudioArg>,

    /// Audio sample rate (AAC only; G.711 is always 8000)
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Audio channels (AAC only)
    #[arg(long, default_value_t = 1)]
    channels: u8,

    /// RTP payload budget before FU-A fragmentation
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    max_payload: usize,

    /// Host advertised in SDP and the stream URL
    #[arg(long)]
    public_host: Option<String>,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn stream_config(&self) -> StreamConfig {
        let audio = self.audio.map(|codec| match codec {
            AudioArg::Pcma => AudioConfig::g711(AudioCodec::Pcma),
            AudioArg::Pcmu => AudioConfig::g711(AudioCodec::Pcmu),
            AudioArg::Aac => AudioConfig::aac(self.sample_rate, self.channels),
        });
        StreamConfig {
            bind_host: self.bind.clone(),
            port: self.port,
            path: self.path.clone(),
            public_host: self.public_host.clone(),
            max_payload: self.max_payload,
            video: VideoConfig {
                width: self.width,
                height: self.height,
                fps: self.fps,
                bitrate_kbps: self.bitrate,
                gop: self.gop,
                ..VideoConfig::default()
            },
            audio,
            ..StreamConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut server = Server::new(args.stream_config(), Arc::new(TestPatternDevice::new()));

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    match server.stream_url() {
        Ok(url) => println!("Streaming on {url} (press Enter to stop)"),
        Err(e) => eprintln!("Server started without a stream URL: {e}"),
    }

    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
    let stats = server.stats();
    println!(
        "Sent {} video frames, {} audio frames, {} bytes",
        stats.frames_sent, stats.audio_frames_sent, stats.bytes_sent
    );
    ExitCode::SUCCESS
}
