use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use livecam::config::loader;
use livecam::engine::SyntheticEngine;
use livecam::server::Server;

#[derive(Parser)]
#[command(
    name = "livecam-server",
    about = "Live camera RTSP streaming server"
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, short)]
    config: PathBuf,

    /// Override the RTSP port from the configuration
    #[arg(long, short)]
    port: Option<u16>,

    /// Replace every camera with a synthetic test pattern source
    #[arg(long)]
    synthetic: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Configuration problems abort before any socket is bound.
    let mut config = match loader::load_path(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(port) = args.port {
        config.set_session_port(port);
    }

    // Hardware capture engines plug in here; the synthetic source keeps
    // the server usable on machines without cameras.
    if !args.synthetic {
        tracing::warn!("no hardware engine compiled in; falling back to synthetic sources");
    }
    let factory = SyntheticEngine::factory();

    let mut server = match Server::from_config(config, factory) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || shutdown.request()) {
        eprintln!("failed to install signal handler: {e}");
        return ExitCode::FAILURE;
    }

    for info in server.stream_infos() {
        println!("{}: {}", info.topic, info.playback_url);
    }

    if let Err(e) = server.run() {
        eprintln!("server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
