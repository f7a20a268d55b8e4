//! WaveStream relay server.
//!
//! ```bash
//! wavestream-relay --listen 127.0.0.1:9400 --engine target/release/wavestream-engine
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wavestream_relay::{ProcessLauncher, RelayServer};

/// Relay between wave-engine processes and TCP clients
#[derive(Parser)]
#[command(name = "wavestream-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to accept client connections on
    #[arg(short, long, default_value = "127.0.0.1:9400")]
    listen: SocketAddr,

    /// Engine executable launched for every run
    #[arg(short, long, default_value = "wavestream-engine")]
    engine: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("wavestream_relay=debug")
        } else {
            EnvFilter::new("wavestream_relay=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let launcher = Arc::new(ProcessLauncher::new(cli.engine));
    let server = match RelayServer::bind(cli.listen, launcher).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, addr = %cli.listen, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay stopped");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    ExitCode::SUCCESS
}
