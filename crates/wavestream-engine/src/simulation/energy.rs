//! Periodic energy and step-timing measurement.

use std::time::Duration;

use super::backend::WaveBackend;
use crate::error::Result;

/// Steps between two measurements.
pub const MEASURE_WINDOW: u64 = 100;

/// One measurement window's results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Average wall time per step over the window, in milliseconds.
    pub step_ms_avg: f64,
    /// Sum of squares of the current field.
    pub energy: f64,
}

/// Accumulates step timings and reduces the field every window.
#[derive(Debug, Clone)]
pub struct EnergyMonitor {
    window: u64,
    elapsed: Duration,
    steps: u64,
}

impl Default for EnergyMonitor {
    fn default() -> Self {
        Self::new(MEASURE_WINDOW)
    }
}

impl EnergyMonitor {
    /// Create a monitor measuring every `window` steps.
    pub fn new(window: u64) -> Self {
        Self {
            window: window.max(1),
            elapsed: Duration::ZERO,
            steps: 0,
        }
    }

    /// Record the wall time of one completed step.
    pub fn record_step(&mut self, elapsed: Duration) {
        self.elapsed += elapsed;
        self.steps += 1;
    }

    /// Whether a measurement is due after `completed` steps.
    pub fn is_due(&self, completed: u64) -> bool {
        completed > 0 && completed % self.window == 0
    }

    /// Average step time (ms) accumulated so far in this window.
    pub fn average_step_ms(&self) -> f64 {
        if self.steps == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1000.0 / self.steps as f64
    }

    /// Reduce the current field, report the window's timing and reset the
    /// timing accumulator.
    pub fn measure(&mut self, backend: &mut dyn WaveBackend) -> Result<Measurement> {
        let energy = backend.energy()?;
        let measurement = Measurement {
            step_ms_avg: self.average_step_ms(),
            energy,
        };
        self.elapsed = Duration::ZERO;
        self.steps = 0;
        Ok(measurement)
    }
}
