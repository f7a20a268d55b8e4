//! # WaveStream Relay
//!
//! Host-side companion to `wavestream-engine`. One session per client
//! connection supervises at most one engine process, parses its text channel,
//! reassembles frames from its binary channel and forwards both to the client.
//!
//! ```text
//! client --control JSON--> Session --args--> engine
//!        <--records------- Session <--text/frames--
//! ```

#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod reassembly;
pub mod server;
pub mod session;
pub mod supervisor;

pub use control::{AnalyticsKey, ClientMessage, ControlCommand, Outbound};
pub use error::{RelayError, Result};
pub use reassembly::FrameAssembler;
pub use server::{encode_record, write_record, RelayServer, TAG_FRAME, TAG_MESSAGE};
pub use session::Session;
pub use supervisor::{EngineHandle, EngineLauncher, EngineStream, LaunchedEngine, ProcessLauncher};
