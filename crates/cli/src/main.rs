mod http;

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{io, thread};

use clap::Parser;
use hls_relay::{Client, RelayConfig, RelayError};

#[derive(Parser)]
#[command(
    name = "hls-relay",
    about = "Relay an RTSP stream as HLS segments over HTTP"
)]
struct Args {
    /// RTSP source URL (rtsp://[user:pass@]host[:port]/path)
    rtsp_url: String,

    /// Directory for segments and the playlist
    #[arg(default_value = "./segments")]
    output_dir: PathBuf,

    /// HTTP port serving the output directory
    #[arg(default_value_t = 8080)]
    port: u16,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: Args) -> Result<(), RelayError> {
    std::fs::create_dir_all(&args.output_dir)?;

    let config = RelayConfig {
        output_dir: args.output_dir.clone(),
        ..RelayConfig::default()
    };
    let mut client = Client::new(&args.rtsp_url, config)?;
    client.start()?;

    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    let http_running = Arc::new(AtomicBool::new(true));
    let http_handle = {
        let running = http_running.clone();
        let dir = args.output_dir.clone();
        thread::spawn(move || http::serve(listener, dir, running))
    };

    println!(
        "Relaying {} -> http://localhost:{}/index.m3u8 — press Enter to stop",
        args.rtsp_url, args.port
    );
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    client.stop();
    http_running.store(false, Ordering::SeqCst);
    let _ = http_handle.join();
    Ok(())
}

/// Map error kinds to the documented exit codes: 2 bad arguments,
/// 3 RTSP failure, 4 I/O, 1 anything else. (clap exits with 2 on its
/// own for unparseable arguments.)
fn exit_code(e: &RelayError) -> u8 {
    match e {
        RelayError::InvalidArgument { .. } => 2,
        RelayError::Connect { .. }
        | RelayError::Timeout { .. }
        | RelayError::Status { .. }
        | RelayError::ProtocolState { .. }
        | RelayError::Parse { .. }
        | RelayError::Sdp { .. } => 3,
        RelayError::Io(_) | RelayError::Playlist { .. } => 4,
        _ => 1,
    }
}
