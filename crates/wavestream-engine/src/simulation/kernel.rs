//! Per-cell FDTD update shared by all backends.
//!
//! The 2D scalar wave equation `∂²p/∂t² = c²∇²p` is discretized as:
//!
//! ```text
//! p[n+1] = 2 p[n] - p[n-1] + coef ∇²p[n] - ν dt ∇²(p[n] - p[n-1])
//! coef   = (c dt / dx)²
//! ```
//!
//! followed by sponge attenuation and a tanh saturation. The WGSL shader in
//! `wgpu_compute` mirrors [`update_cell`] line for line.

/// Artificial viscosity strength.
pub const VISCOSITY: f32 = 0.1;

/// Per-step attenuation rate at full sponge strength.
pub const SPONGE_RATE: f32 = 0.03;

/// Magnitude bound of the saturating nonlinearity.
pub const SATURATION: f32 = 5.0;

/// 5-point stencil values around one cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stencil {
    pub center: f32,
    pub north: f32,
    pub south: f32,
    pub west: f32,
    pub east: f32,
}

impl Stencil {
    /// Gather the stencil at linear index `idx` of a row-major grid.
    #[inline(always)]
    pub fn gather(field: &[f32], idx: usize, width: usize) -> Self {
        Self {
            center: field[idx],
            north: field[idx - width],
            south: field[idx + width],
            west: field[idx - 1],
            east: field[idx + 1],
        }
    }

    /// Discrete 4-neighbor Laplacian.
    #[inline(always)]
    pub fn laplacian(&self) -> f32 {
        self.north + self.south + self.east + self.west - 4.0 * self.center
    }

    /// Pointwise difference `self - other`.
    #[inline(always)]
    pub fn minus(&self, other: &Stencil) -> Stencil {
        Stencil {
            center: self.center - other.center,
            north: self.north - other.north,
            south: self.south - other.south,
            west: self.west - other.west,
            east: self.east - other.east,
        }
    }
}

/// Sponge attenuation factor for a mask value.
#[inline(always)]
pub fn sponge_factor(mask: f32) -> f32 {
    (1.0 - SPONGE_RATE * mask).max(0.0)
}

/// Saturating nonlinearity applied before storing a value.
#[inline(always)]
pub fn saturate(value: f32) -> f32 {
    SATURATION * (value / SATURATION).tanh()
}

/// Compute the next value of one interior cell.
#[inline(always)]
pub fn update_cell(current: &Stencil, previous: &Stencil, coef: f32, mask: f32, dt: f32) -> f32 {
    let laplacian = current.laplacian();
    let laplacian_rate = current.minus(previous).laplacian();

    let mut next =
        2.0 * current.center - previous.center + coef * laplacian - VISCOSITY * dt * laplacian_rate;

    if mask > 0.0 {
        next *= sponge_factor(mask);
    }

    saturate(next)
}
