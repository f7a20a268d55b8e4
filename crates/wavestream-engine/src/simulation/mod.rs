//! Simulation core for 2D acoustic wave propagation.

mod backend;
mod cpu;
mod energy;
mod fields;
pub mod kernel;
mod medium;
mod source;
mod sponge;
mod velocity;

#[cfg(feature = "wgpu")]
pub mod wgpu_compute;

pub use backend::WaveBackend;
pub use cpu::CpuBackend;
pub use energy::{EnergyMonitor, Measurement, MEASURE_WINDOW};
pub use fields::{FieldSet, Rotation, Slot, StepView};
pub use medium::Medium;
pub use source::{ricker, PointSource, SourceTap, SOURCE_DECAY, SOURCE_RADIUS};
pub use sponge::{build_sponge, edge_distance, sponge_value};
pub use velocity::VelocityModel;

#[cfg(feature = "wgpu")]
pub use wgpu_compute::WgpuBackend;

use crate::config::{BackendKind, SimConfig};
use crate::error::Result;

/// Create the backend selected by `config` and upload `medium` to it.
pub fn create_backend(config: &SimConfig, medium: Medium) -> Result<Box<dyn WaveBackend>> {
    match config.backend {
        BackendKind::Cpu => Ok(Box::new(CpuBackend::new(medium))),
        #[cfg(feature = "wgpu")]
        BackendKind::Wgpu => {
            let backend = pollster::block_on(WgpuBackend::new(&medium))?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "wgpu"))]
        BackendKind::Wgpu => {
            drop(medium);
            Err(crate::error::WaveError::BackendUnavailable(
                "wgpu backend not compiled in. Enable with --features wgpu".to_string(),
            ))
        }
    }
}
