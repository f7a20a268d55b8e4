//! Engine process supervision.
//!
//! A launcher starts one engine and returns its two output streams plus a
//! handle that can kill it. Termination is forceful: the process is killed
//! and reaped, nothing is drained.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::error::{RelayError, Result};

/// Boxed engine output stream.
pub type EngineStream = Box<dyn AsyncRead + Send + Unpin>;

/// Control over one running engine.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Kill the engine and wait until it has exited.
    async fn terminate(&mut self) -> Result<()>;
}

/// A freshly launched engine.
pub struct LaunchedEngine {
    /// Kill switch.
    pub handle: Box<dyn EngineHandle>,
    /// Binary channel (frames).
    pub binary: EngineStream,
    /// Text channel (protocol lines).
    pub text: EngineStream,
}

/// Starts engines.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Launch an engine with the given command-line arguments.
    async fn launch(&self, args: &[String]) -> Result<LaunchedEngine>;
}

/// Launches the engine binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    /// Launch `program` for every run.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Engine executable path.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, args: &[String]) -> Result<LaunchedEngine> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::Launch(format!("{}: {}", self.program.display(), e)))?;

        let binary = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Launch("engine stdout not captured".to_string()))?;
        let text = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::Launch("engine stderr not captured".to_string()))?;

        tracing::info!(pid = ?child.id(), ?args, "engine launched");

        Ok(LaunchedEngine {
            handle: Box::new(ProcessHandle { child }),
            binary: Box::new(binary),
            text: Box::new(text),
        })
    }
}

/// Handle to an engine child process.
struct ProcessHandle {
    child: Child,
}

#[async_trait]
impl EngineHandle for ProcessHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            tracing::debug!(%status, "engine already exited");
            return Ok(());
        }
        let pid = self.child.id();
        // Sends SIGKILL and reaps the process.
        self.child.kill().await?;
        tracing::info!(?pid, "engine terminated");
        Ok(())
    }
}
