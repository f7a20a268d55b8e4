//! Compute backend abstraction.
//!
//! A backend owns the three field buffers and the static medium in whatever
//! memory its execution units read from (host memory for the CPU backend,
//! device buffers for WebGPU). The engine drives it through a fixed
//! per-step sequence:
//!
//! ```text
//! step() -> inject() -> rotate() -> synchronize()
//!                                     |
//!                      energy() / read_field() when due
//! ```
//!
//! Each call must observe every write of the calls issued before it.

use super::source::SourceTap;
use crate::error::Result;

/// Execution backend for the FDTD engine.
pub trait WaveBackend: Send {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Apply the stencil update to every interior cell, writing the next
    /// buffer from the previous and current buffers.
    fn step(&mut self) -> Result<()>;

    /// Add `pulse * weight` at every tap in the next buffer.
    fn inject(&mut self, taps: &[SourceTap], pulse: f32) -> Result<()>;

    /// Advance the buffer rotation by one time level.
    fn rotate(&mut self);

    /// Block until all issued work has completed.
    fn synchronize(&mut self) -> Result<()>;

    /// Sum of squares of the current field.
    fn energy(&mut self) -> Result<f64>;

    /// Copy the current field into `out` (row-major, `nx * ny` cells).
    fn read_field(&mut self, out: &mut [f32]) -> Result<()>;
}
