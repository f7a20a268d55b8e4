//! Static medium description: speed field, sponge mask and the derived
//! per-cell wave-equation coefficients.

use super::sponge::build_sponge;
use crate::config::SimConfig;

/// Immutable per-cell properties built once at startup.
#[derive(Debug, Clone)]
pub struct Medium {
    /// Grid width.
    pub nx: usize,
    /// Grid height.
    pub ny: usize,
    /// Wave speed per cell (m/s).
    pub speed: Vec<f32>,
    /// Sponge coefficient per cell in `[0, 1]`.
    pub sponge: Vec<f32>,
    /// `(c dt / dx)²` per cell.
    pub coef: Vec<f32>,
    /// Time step (s).
    pub dt: f32,
}

impl Medium {
    /// Build the medium for a resolved configuration.
    pub fn from_config(config: &SimConfig) -> Self {
        let (nx, ny) = (config.nx, config.ny);
        let speed = config.model.build(nx, ny, config.c0 as f32);
        let sponge = build_sponge(nx, ny, config.pml);
        let ratio = (config.dt / config.dx) as f32;
        let coef = speed.iter().map(|&c| (c * ratio).powi(2)).collect();

        tracing::debug!(
            nx,
            ny,
            model = config.model.name(),
            pml = config.pml,
            "built medium"
        );

        Self {
            nx,
            ny,
            speed,
            sponge,
            coef,
            dt: config.dt as f32,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    /// Whether the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the grid has at least one interior cell.
    pub fn has_interior(&self) -> bool {
        self.nx >= 3 && self.ny >= 3
    }
}
