use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{ArgAction, Parser};

use tandem::config;
use tandem::server;
use tandem::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "tandemd",
    version,
    about = "Shared-workspace event serializer"
)]
struct Cli {
    /// Port to listen on; 0 picks an ephemeral port.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Directory holding the bundled frontend; must exist.
    #[arg(long, alias = "static_dir", value_name = "PATH")]
    static_dir: Option<PathBuf>,

    /// Optional JSON config file (limits, logging).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    telemetry::init(telemetry::TelemetryConfig {
        verbosity: cli.verbose,
        format: config.logging.stdout_format,
    });

    // The frontend directory contract is checked up front; serving the
    // assets themselves is left to the embedding deployment.
    if let Some(dir) = &cli.static_dir {
        if !dir.is_dir() {
            tracing::error!(path = %dir.display(), "static dir missing or not a directory");
            eprintln!(
                "error: static dir missing or not a directory: {}",
                dir.display()
            );
            std::process::exit(1);
        }
        tracing::info!(path = %dir.display(), "frontend assets directory");
    }

    let addr = format!("{}:{}", cli.host, cli.port);
    let handle = match server::serve(&addr, &config) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!("bind failed on {addr}: {err}");
            eprintln!("error: bind failed on {addr}: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = handle.shutdown_flag();
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    tracing::info!("shutdown signal received");
    handle.shutdown();
}
