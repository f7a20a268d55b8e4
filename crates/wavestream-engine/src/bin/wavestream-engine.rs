//! WaveStream engine process.
//!
//! Text protocol on stderr, binary frames on stdout.
//!
//! ```bash
//! wavestream-engine --nx 512 --ny 512 --steps 0 --model two_layer > frames.bin
//! ```

use std::io::{self, BufWriter};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wavestream_engine::{Engine, EngineArgs, FrameEmitter};

fn main() -> ExitCode {
    // Unknown options and bad values exit nonzero with clap's diagnostic.
    let args = EngineArgs::parse();

    // Logs share stderr with the text channel; keep them quiet by default.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wavestream_engine=warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = args.resolve();

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stderr = io::stderr();
    let stdout = io::stdout();
    let mut emitter = FrameEmitter::new(stderr.lock(), BufWriter::new(stdout.lock()));

    match engine.run(&mut emitter) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) if e.is_broken_pipe() => {
            tracing::info!("consumer closed the stream");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR {}", e);
            ExitCode::FAILURE
        }
    }
}
