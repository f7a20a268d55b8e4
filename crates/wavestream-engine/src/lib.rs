//! # WaveStream Engine
//!
//! Time-stepped 2D acoustic wave simulation that streams field snapshots
//! to a host process in real time.
//!
//! The engine resolves a flat option set into a CFL-stable configuration,
//! builds a velocity model and an absorbing sponge layer, then advances the
//! pressure field with a 5-point FDTD stencil (artificial viscosity, sponge
//! attenuation, tanh saturation) on a data-parallel backend. A Ricker point
//! source drives the field.
//!
//! ## Channels
//!
//! - **stderr** (text): `HEADER`, `PERF` and `ENERGY` lines.
//! - **stdout** (binary): raw `nx * ny * 4` byte frames.
//!
//! ## Backends
//!
//! - `cpu` (default): rayon row-parallel kernels.
//! - `wgpu` (feature `wgpu`): WGSL compute shaders.
//!
//! ## Run
//!
//! ```bash
//! cargo run -p wavestream-engine --release -- --nx 256 --ny 256 --model circle
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod simulation;

pub use config::{BackendKind, EngineArgs, SimConfig};
pub use engine::{Engine, RunSummary};
pub use error::{Result, WaveError};
pub use protocol::{EmitterState, FrameEmitter, TextMessage};
pub use simulation::{VelocityModel, WaveBackend};
