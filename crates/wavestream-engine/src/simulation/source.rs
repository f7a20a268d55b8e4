//! Band-limited point source.
//!
//! The source waveform is a Ricker wavelet (second derivative of a Gaussian)
//! delayed by one period so that it starts near zero:
//!
//! ```text
//! tau = t - 1/f0
//! a   = (π f0 tau)²
//! r   = amp (1 - 2a) e^(-a)
//! ```
//!
//! The pulse is spread over a small disk with a Gaussian falloff.

/// Radius of the injection disk in cells.
pub const SOURCE_RADIUS: i64 = 3;

/// Decay scale of the Gaussian falloff (in squared cells).
pub const SOURCE_DECAY: f32 = 9.0;

/// One injection target: a linear cell index and its spatial weight.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SourceTap {
    /// Row-major cell index.
    pub index: u32,
    /// Gaussian weight at that cell.
    pub weight: f32,
}

/// Point source with a Ricker wavelet.
#[derive(Debug, Clone)]
pub struct PointSource {
    amplitude: f32,
    frequency: f32,
    taps: Vec<SourceTap>,
}

impl PointSource {
    /// Create a source at `(sx, sy)` on an `nx * ny` grid.
    ///
    /// Cells on the boundary ring or outside the grid are skipped, so a source
    /// near the edge injects into fewer cells.
    pub fn new(amplitude: f32, frequency: f32, sx: usize, sy: usize, nx: usize, ny: usize) -> Self {
        let mut taps = Vec::new();
        let r2 = SOURCE_RADIUS * SOURCE_RADIUS;

        for oy in -SOURCE_RADIUS..=SOURCE_RADIUS {
            for ox in -SOURCE_RADIUS..=SOURCE_RADIUS {
                let d2 = ox * ox + oy * oy;
                if d2 > r2 {
                    continue;
                }
                let x = sx as i64 + ox;
                let y = sy as i64 + oy;
                if x < 1 || y < 1 || x >= nx as i64 - 1 || y >= ny as i64 - 1 {
                    continue;
                }
                taps.push(SourceTap {
                    index: (y as usize * nx + x as usize) as u32,
                    weight: (-(d2 as f32) / SOURCE_DECAY).exp(),
                });
            }
        }

        Self {
            amplitude,
            frequency,
            taps,
        }
    }

    /// Injection targets.
    pub fn taps(&self) -> &[SourceTap] {
        &self.taps
    }

    /// Pulse value at simulated time `t` (seconds).
    pub fn pulse(&self, t: f32) -> f32 {
        ricker(t, self.frequency, self.amplitude)
    }
}

/// Ricker wavelet delayed by `1/f0`.
pub fn ricker(t: f32, f0: f32, amplitude: f32) -> f32 {
    if f0 <= 0.0 {
        return 0.0;
    }
    let tau = t - 1.0 / f0;
    let a = (std::f32::consts::PI * f0 * tau).powi(2);
    amplitude * (1.0 - 2.0 * a) * (-a).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ricker_peak_at_delay() {
        let f0 = 10.0;
        assert!((ricker(0.1, f0, 2.0) - 2.0).abs() < 1e-6);
        assert!(ricker(0.1, f0, 1.0) > ricker(0.09, f0, 1.0));
        assert!(ricker(0.1, f0, 1.0) > ricker(0.11, f0, 1.0));
    }

    #[test]
    fn test_ricker_zero_amplitude() {
        for i in 0..100 {
            assert_eq!(ricker(i as f32 * 0.001, 15.0, 0.0), 0.0);
        }
    }

    #[test]
    fn test_ricker_starts_near_zero() {
        assert!(ricker(0.0, 15.0, 1.0).abs() < 2e-3);
    }

    #[test]
    fn test_full_disk_tap_count() {
        // Lattice points with x² + y² <= 9.
        let source = PointSource::new(1.0, 15.0, 32, 32, 64, 64);
        assert_eq!(source.taps().len(), 29);
        let center = source
            .taps()
            .iter()
            .find(|t| t.index == 32 * 64 + 32)
            .expect("center tap");
        assert_eq!(center.weight, 1.0);
    }

    #[test]
    fn test_weights_decay() {
        let source = PointSource::new(1.0, 15.0, 10, 10, 32, 32);
        let edge = source
            .taps()
            .iter()
            .find(|t| t.index == 10 * 32 + 13)
            .expect("radius tap");
        assert!((edge.weight - (-1.0f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_edge_source_excludes_ring() {
        let (nx, ny) = (16, 16);
        let source = PointSource::new(1.0, 15.0, 0, 0, nx, ny);
        assert!(!source.taps().is_empty());
        for tap in source.taps() {
            let x = tap.index as usize % nx;
            let y = tap.index as usize / nx;
            assert!(x >= 1 && y >= 1 && x < nx - 1 && y < ny - 1);
        }
    }

    #[test]
    fn test_taps_are_distinct() {
        let source = PointSource::new(1.0, 15.0, 8, 8, 16, 16);
        let mut indices: Vec<u32> = source.taps().iter().map(|t| t.index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), source.taps().len());
    }
}
