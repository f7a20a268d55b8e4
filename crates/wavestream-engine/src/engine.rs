//! The time-stepping run loop.
//!
//! ```text
//! resolve -> medium -> backend -> HEADER
//! loop {
//!     step -> inject -> rotate -> synchronize
//!     every 100 steps:          PERF + ENERGY
//!     every frames_every steps: binary frame
//! }
//! ```

use std::io::Write;
use std::time::Instant;

use crate::config::SimConfig;
use crate::error::Result;
use crate::protocol::FrameEmitter;
use crate::simulation::{
    create_backend, EnergyMonitor, Measurement, Medium, PointSource, WaveBackend,
};

/// Totals reported when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Completed steps.
    pub steps: u64,
    /// Frames written to the binary channel.
    pub frames: u64,
    /// Measurement windows emitted.
    pub measurements: u64,
}

/// Wave engine owning the backend, the source and the energy monitor.
pub struct Engine {
    config: SimConfig,
    backend: Box<dyn WaveBackend>,
    source: PointSource,
    monitor: EnergyMonitor,
    frame: Vec<f32>,
    completed: u64,
}

impl Engine {
    /// Build the medium and the configured backend.
    pub fn new(config: SimConfig) -> Result<Self> {
        let medium = Medium::from_config(&config);
        let backend = create_backend(&config, medium)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Use an already constructed backend.
    pub fn with_backend(config: SimConfig, backend: Box<dyn WaveBackend>) -> Self {
        let source = PointSource::new(
            config.amplitude as f32,
            config.frequency as f32,
            config.source_x,
            config.source_y,
            config.nx,
            config.ny,
        );
        tracing::info!(
            backend = backend.name(),
            nx = config.nx,
            ny = config.ny,
            dt = config.dt,
            taps = source.taps().len(),
            "engine ready"
        );
        Self {
            frame: vec![0.0; config.cell_count()],
            config,
            backend,
            source,
            monitor: EnergyMonitor::default(),
            completed: 0,
        }
    }

    /// Resolved configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Steps completed so far.
    pub fn completed_steps(&self) -> u64 {
        self.completed
    }

    /// Advance one time level: stencil, source, rotation, device sync.
    pub fn step(&mut self) -> Result<()> {
        let started = Instant::now();
        let t = self.completed as f32 * self.config.dt as f32;

        self.backend.step()?;
        self.backend.inject(self.source.taps(), self.source.pulse(t))?;
        self.backend.rotate();
        self.backend.synchronize()?;

        self.monitor.record_step(started.elapsed());
        self.completed += 1;
        Ok(())
    }

    /// Measure energy and timing over the finished window.
    pub fn measure(&mut self) -> Result<Measurement> {
        self.monitor.measure(self.backend.as_mut())
    }

    /// Copy of the current field.
    pub fn snapshot(&mut self) -> Result<&[f32]> {
        self.backend.read_field(&mut self.frame)?;
        Ok(&self.frame)
    }

    /// Run until the step budget is exhausted, emitting header, analytics
    /// and frames through `emitter`.
    pub fn run<T: Write, B: Write>(&mut self, emitter: &mut FrameEmitter<T, B>) -> Result<RunSummary> {
        emitter.send_header(&self.config)?;
        emitter.start_streaming()?;

        let mut summary = RunSummary::default();
        while !self.config.is_bounded() || self.completed < self.config.steps {
            self.step()?;

            if self.monitor.is_due(self.completed) {
                let measurement = self.measure()?;
                tracing::debug!(
                    step = self.completed,
                    step_ms_avg = measurement.step_ms_avg,
                    energy = measurement.energy,
                    "measurement window"
                );
                emitter.send_measurement(&measurement)?;
                summary.measurements += 1;
            }

            if self.completed % self.config.frames_every == 0 {
                self.backend.read_field(&mut self.frame)?;
                emitter.send_frame(&self.frame)?;
                summary.frames += 1;
            }
        }

        emitter.finish()?;
        summary.steps = self.completed;
        tracing::info!(
            steps = summary.steps,
            frames = summary.frames,
            "run complete"
        );
        Ok(summary)
    }
}
