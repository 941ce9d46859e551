mod feed;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use rtsp::{Codec, Server, ServerConfig, StreamConfig};

#[derive(Parser)]
#[command(
    name = "camstream-rtsp",
    about = "RTSP server publishing one H.264/H.265 camera stream"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: SocketAddr,

    /// Path the stream is published under
    #[arg(long, default_value = "/stream")]
    path: String,

    /// Stream codec (h264 or h265)
    #[arg(long, default_value = "h264")]
    codec: Codec,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Frame rate used to pace the input file
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Maximum concurrent clients
    #[arg(long, default_value_t = 8)]
    max_clients: usize,

    /// Seconds without activity before a session is evicted
    #[arg(long, default_value_t = 120)]
    idle_timeout: u64,

    /// Host advertised in SDP instead of the one the client used
    #[arg(long)]
    public_host: Option<String>,

    /// Annex B elementary stream to publish
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Loop the input file
    #[arg(long = "loop")]
    repeat: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut stream = StreamConfig::new(args.codec, args.width, args.height);
    stream.framerate = Some(args.fps);

    let mut config = ServerConfig::default()
        .bind(args.bind)
        .max_clients(args.max_clients)
        .idle_timeout(Duration::from_secs(args.idle_timeout))
        .stream_path(&args.path)
        .stream(stream);
    if let Some(host) = &args.public_host {
        config = config.public_host(host);
    }

    let server = Arc::new(Server::new(config));
    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let feeder = match &args.input {
        Some(path) => match feed::run(
            server.clone(),
            path,
            args.codec,
            args.fps,
            args.repeat,
            running.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("Failed to read {}: {}", path.display(), e);
                server.stop();
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("no --input given; clients can connect but will receive no media");
            None
        }
    };

    let url_host = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| args.bind.to_string());
    println!(
        "RTSP server on rtsp://{}{}, press Enter to stop",
        url_host,
        server.mount().path()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    running.store(false, Ordering::SeqCst);
    if let Some(handle) = feeder {
        let _ = handle.join();
    }
    let stats = server.stats();
    tracing::info!(
        frames_pushed = stats.frames_pushed,
        frames_dropped = stats.frames_dropped,
        packets_sent = stats.packets_sent,
        bytes_sent = stats.bytes_sent,
        "shutting down"
    );
    server.stop();
}
