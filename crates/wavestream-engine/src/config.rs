//! Parameter resolution for the wave engine.
//!
//! Options arrive either as command-line flags or as a flat `name -> value`
//! map. Both paths go through the same clap parser, so unknown names and
//! unparsable values are rejected identically. Resolution fills defaults and
//! enforces the CFL bound for the 2D scalar wave equation:
//!
//! ```text
//! dt <= cfl * dx / (sqrt(2) * c0)
//! ```
//!
//! A requested `dt` above the bound is clamped down to it, never rejected.

use clap::{Parser, ValueEnum};

use crate::error::{Result, WaveError};
use crate::simulation::VelocityModel;

/// Default grid width and height.
pub const DEFAULT_GRID: usize = 512;

/// Compute backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// Data-parallel CPU kernels on the rayon thread pool.
    #[default]
    Cpu,
    /// WGSL compute shaders on a WebGPU device.
    Wgpu,
}

/// Raw engine options. Every field is optional; unset fields take defaults
/// during [`EngineArgs::resolve`].
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "wavestream-engine")]
#[command(version, about = "2D acoustic wave engine streaming field frames", long_about = None)]
pub struct EngineArgs {
    /// Grid width in cells
    #[arg(long)]
    pub nx: Option<usize>,

    /// Grid height in cells
    #[arg(long)]
    pub ny: Option<usize>,

    /// Cell spacing in meters
    #[arg(long, value_parser = positive_f64)]
    pub dx: Option<f64>,

    /// Requested time step in seconds (clamped to the CFL bound)
    #[arg(long, value_parser = positive_f64)]
    pub dt: Option<f64>,

    /// Step budget (0 runs until terminated)
    #[arg(long)]
    pub steps: Option<u64>,

    /// Emit a binary frame every N steps
    #[arg(long)]
    pub frames_every: Option<u64>,

    /// Absorbing layer thickness in cells (<= 0 disables absorption)
    #[arg(long, allow_hyphen_values = true)]
    pub pml: Option<i64>,

    /// Base wave speed in m/s
    #[arg(long, value_parser = positive_f64)]
    pub c0: Option<f64>,

    /// Source amplitude
    #[arg(long, allow_hyphen_values = true)]
    pub amp: Option<f64>,

    /// Source dominant frequency in Hz
    #[arg(long)]
    pub f0: Option<f64>,

    /// Source column (defaults to the grid center)
    #[arg(long)]
    pub sx: Option<usize>,

    /// Source row (defaults to the grid center)
    #[arg(long)]
    pub sy: Option<usize>,

    /// CFL safety factor
    #[arg(long, value_parser = positive_f64)]
    pub cfl: Option<f64>,

    /// Velocity model (homogeneous, two_layer, circle)
    #[arg(long)]
    pub model: Option<String>,

    /// Compute backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
}

impl EngineArgs {
    /// Parse options from a flat `name -> value` list.
    ///
    /// Names may use `_` or `-` as separators (`frames_every`, `frames-every`).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut argv = vec!["wavestream-engine".to_string()];
        for (name, value) in pairs {
            argv.push(format!("--{}", name.as_ref().replace('_', "-")));
            argv.push(value.as_ref().to_string());
        }
        Self::try_parse_from(argv).map_err(|e| WaveError::InvalidOption(e.to_string()))
    }

    /// Apply defaults and the stability bound.
    pub fn resolve(&self) -> SimConfig {
        let nx = self.nx.unwrap_or(DEFAULT_GRID);
        let ny = self.ny.unwrap_or(DEFAULT_GRID);
        let dx = self.dx.unwrap_or(10.0);
        let c0 = self.c0.unwrap_or(3000.0);
        let cfl = self.cfl.unwrap_or(0.9);
        let requested_dt = self.dt.unwrap_or(0.001);

        let dt_max = stable_dt(cfl, dx, c0);
        let dt = if requested_dt > dt_max {
            tracing::warn!(
                requested = requested_dt,
                clamped = dt_max,
                "time step exceeds CFL bound, clamping"
            );
            dt_max
        } else {
            requested_dt
        };

        let model_name = self.model.as_deref().unwrap_or("homogeneous");

        SimConfig {
            nx,
            ny,
            dx,
            dt,
            steps: self.steps.unwrap_or(5000),
            frames_every: self.frames_every.unwrap_or(10).max(1),
            pml: self.pml.unwrap_or(40),
            c0,
            amplitude: self.amp.unwrap_or(1.0),
            frequency: self.f0.unwrap_or(15.0),
            source_x: self.sx.unwrap_or(nx / 2),
            source_y: self.sy.unwrap_or(ny / 2),
            cfl,
            model: VelocityModel::from_name(model_name),
            backend: self.backend.unwrap_or_default(),
        }
    }
}

/// Value parser for quantities that must be finite and strictly positive.
fn positive_f64(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("must be a positive number, got {}", raw))
    }
}

/// Largest time step satisfying the CFL condition for the given medium.
pub fn stable_dt(cfl: f64, dx: f64, c0: f64) -> f64 {
    cfl * dx / (std::f64::consts::SQRT_2 * c0)
}

/// Fully resolved simulation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Grid width (columns).
    pub nx: usize,
    /// Grid height (rows).
    pub ny: usize,
    /// Cell spacing in meters.
    pub dx: f64,
    /// Time step in seconds, already CFL-clamped.
    pub dt: f64,
    /// Step budget; 0 means unbounded.
    pub steps: u64,
    /// Frame emission interval in steps (>= 1).
    pub frames_every: u64,
    /// Absorbing layer thickness in cells.
    pub pml: i64,
    /// Base wave speed in m/s.
    pub c0: f64,
    /// Source amplitude.
    pub amplitude: f64,
    /// Source dominant frequency in Hz.
    pub frequency: f64,
    /// Source column.
    pub source_x: usize,
    /// Source row.
    pub source_y: usize,
    /// CFL safety factor.
    pub cfl: f64,
    /// Velocity model variant.
    pub model: VelocityModel,
    /// Compute backend.
    pub backend: BackendKind,
}

impl Default for SimConfig {
    fn default() -> Self {
        EngineArgs::default().resolve()
    }
}

impl SimConfig {
    /// Number of cells in the grid.
    pub fn cell_count(&self) -> usize {
        self.nx * self.ny
    }

    /// Size of one binary frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.cell_count() * std::mem::size_of::<f32>()
    }

    /// CFL ceiling for this configuration.
    pub fn dt_max(&self) -> f64 {
        stable_dt(self.cfl, self.dx, self.c0)
    }

    /// Courant number (c0 * dt / dx) for the base speed.
    pub fn courant_number(&self) -> f64 {
        self.c0 * self.dt / self.dx
    }

    /// Check that the base speed satisfies the 2D stability condition.
    pub fn is_stable(&self) -> bool {
        self.courant_number() <= 1.0 / std::f64::consts::SQRT_2
    }

    /// Wavelength of the source's dominant frequency in the base medium.
    pub fn wavelength(&self) -> f64 {
        self.c0 / self.frequency
    }

    /// Number of cells per dominant wavelength.
    pub fn cells_per_wavelength(&self) -> f64 {
        self.wavelength() / self.dx
    }

    /// Whether the step loop is bounded.
    pub fn is_bounded(&self) -> bool {
        self.steps > 0
    }
}
