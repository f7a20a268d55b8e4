//! CPU backend: data-parallel per-cell kernels on the rayon pool.
//!
//! Interior rows of the next buffer are split with `par_chunks_mut`, so each
//! row has exactly one writer while the previous and current buffers are
//! shared read-only. Small grids run sequentially, where the pool overhead
//! would dominate.

use rayon::prelude::*;

use super::backend::WaveBackend;
use super::fields::{FieldSet, Slot};
use super::kernel::{update_cell, Stencil};
use super::medium::Medium;
use super::source::SourceTap;
use crate::error::{Result, WaveError};

/// Grid width or height at which row-parallel processing kicks in.
const PARALLEL_THRESHOLD: usize = 128;

/// Host-memory backend.
pub struct CpuBackend {
    medium: Medium,
    fields: FieldSet,
}

impl CpuBackend {
    /// Allocate zeroed field buffers for `medium`.
    pub fn new(medium: Medium) -> Self {
        let fields = FieldSet::zeroed(medium.len());
        tracing::debug!(cells = medium.len(), threads = rayon::current_num_threads(), "CPU backend ready");
        Self { medium, fields }
    }

    /// Borrow the current field.
    pub fn current(&self) -> &[f32] {
        self.fields.get(Slot::Current)
    }

    /// Mutable access to the current field (for seeding initial conditions).
    pub fn current_mut(&mut self) -> &mut [f32] {
        self.fields.get_mut(Slot::Current)
    }

    fn step_rows(&mut self, parallel: bool) {
        let nx = self.medium.nx;
        let ny = self.medium.ny;
        let dt = self.medium.dt;
        let coef = &self.medium.coef;
        let sponge = &self.medium.sponge;
        let view = self.fields.step_view();
        let (previous, current) = (view.previous, view.current);

        // Skip row 0 and row ny-1; they stay untouched.
        let interior = &mut view.next[nx..(ny - 1) * nx];

        let update_row = |row_offset: usize, row: &mut [f32]| {
            let row_start = (row_offset + 1) * nx;
            for x in 1..nx - 1 {
                let idx = row_start + x;
                let cur = Stencil::gather(current, idx, nx);
                let prev = Stencil::gather(previous, idx, nx);
                row[x] = update_cell(&cur, &prev, coef[idx], sponge[idx], dt);
            }
        };

        if parallel {
            interior
                .par_chunks_mut(nx)
                .enumerate()
                .for_each(|(row_offset, row)| update_row(row_offset, row));
        } else {
            interior
                .chunks_mut(nx)
                .enumerate()
                .for_each(|(row_offset, row)| update_row(row_offset, row));
        }
    }
}

impl WaveBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn step(&mut self) -> Result<()> {
        if !self.medium.has_interior() {
            return Ok(());
        }
        let parallel = self.medium.nx >= PARALLEL_THRESHOLD || self.medium.ny >= PARALLEL_THRESHOLD;
        self.step_rows(parallel);
        Ok(())
    }

    fn inject(&mut self, taps: &[SourceTap], pulse: f32) -> Result<()> {
        let next = self.fields.get_mut(Slot::Next);
        for tap in taps {
            let cell = next.get_mut(tap.index as usize).ok_or_else(|| {
                WaveError::device("inject source", format!("tap index {} out of range", tap.index))
            })?;
            *cell += pulse * tap.weight;
        }
        Ok(())
    }

    fn rotate(&mut self) {
        self.fields.rotate();
    }

    fn synchronize(&mut self) -> Result<()> {
        // rayon joins every parallel operation before returning.
        Ok(())
    }

    fn energy(&mut self) -> Result<f64> {
        Ok(self
            .fields
            .get(Slot::Current)
            .par_iter()
            .map(|&p| (p as f64) * (p as f64))
            .sum())
    }

    fn read_field(&mut self, out: &mut [f32]) -> Result<()> {
        let current = self.fields.get(Slot::Current);
        if out.len() != current.len() {
            return Err(WaveError::device(
                "read field",
                format!("output holds {} cells, field has {}", out.len(), current.len()),
            ));
        }
        out.copy_from_slice(current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineArgs;
    use crate::simulation::PointSource;

    fn backend(pairs: &[(&str, &str)]) -> CpuBackend {
        let config = EngineArgs::from_pairs(pairs.iter().copied()).unwrap().resolve();
        CpuBackend::new(Medium::from_config(&config))
    }

    #[test]
    fn test_zero_field_stays_zero() {
        let mut b = backend(&[("nx", "32"), ("ny", "32")]);
        for _ in 0..50 {
            b.step().unwrap();
            b.rotate();
        }
        assert_eq!(b.energy().unwrap(), 0.0);
    }

    #[test]
    fn test_impulse_spreads_to_neighbors() {
        let mut b = backend(&[("nx", "16"), ("ny", "16"), ("pml", "0")]);
        b.current_mut()[8 * 16 + 8] = 1.0;
        b.step().unwrap();
        b.rotate();
        let field = b.current();
        assert!(field[8 * 16 + 9] > 0.0);
        assert!(field[7 * 16 + 8] > 0.0);
        // Symmetric stencil.
        assert_eq!(field[8 * 16 + 9], field[8 * 16 + 7]);
        assert_eq!(field[7 * 16 + 8], field[9 * 16 + 8]);
    }

    #[test]
    fn test_boundary_ring_never_written() {
        let mut b = backend(&[("nx", "12"), ("ny", "10"), ("pml", "0")]);
        let source = PointSource::new(1.0, 15.0, 1, 1, 12, 10);
        for step in 0..40 {
            b.step().unwrap();
            b.inject(source.taps(), 1.0 + step as f32).unwrap();
            b.rotate();
        }
        let field = b.current();
        for x in 0..12 {
            assert_eq!(field[x], 0.0);
            assert_eq!(field[9 * 12 + x], 0.0);
        }
        for y in 0..10 {
            assert_eq!(field[y * 12], 0.0);
            assert_eq!(field[y * 12 + 11], 0.0);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let pairs = [("nx", "40"), ("ny", "24"), ("pml", "5")];
        let mut seq = backend(&pairs);
        let mut par = backend(&pairs);
        let source = PointSource::new(1.0, 20.0, 20, 12, 40, 24);

        for step in 0..30 {
            let pulse = source.pulse(step as f32 * 0.001);
            seq.step_rows(false);
            par.step_rows(true);
            seq.inject(source.taps(), pulse).unwrap();
            par.inject(source.taps(), pulse).unwrap();
            seq.rotate();
            par.rotate();
        }
        assert_eq!(seq.current(), par.current());
    }

    #[test]
    fn test_energy_sum_of_squares() {
        let mut b = backend(&[("nx", "4"), ("ny", "4")]);
        b.current_mut()[5] = 2.0;
        b.current_mut()[6] = -3.0;
        assert_eq!(b.energy().unwrap(), 13.0);
    }

    #[test]
    fn test_read_field_size_mismatch() {
        let mut b = backend(&[("nx", "4"), ("ny", "4")]);
        let mut out = vec![0.0; 3];
        assert!(matches!(b.read_field(&mut out), Err(WaveError::Device { .. })));
    }

    #[test]
    fn test_degenerate_grid_steps() {
        let mut b = backend(&[("nx", "2"), ("ny", "2")]);
        b.step().unwrap();
        b.rotate();
        assert_eq!(b.energy().unwrap(), 0.0);
    }
}
