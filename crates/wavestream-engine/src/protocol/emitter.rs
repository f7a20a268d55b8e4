//! Frame emitter state machine.
//!
//! ```text
//! Uninitialized --send_header--> HeaderSent --start_streaming--> Streaming
//!        |                            |                              |
//!        +----------------------------+------------finish----------->+--> Terminated
//! ```
//!
//! The emitter never buffers beyond the writers it is given and performs no
//! flow control: a consumer that stops draining the channel blocks the engine.

use std::io::Write;

use super::TextMessage;
use crate::config::SimConfig;
use crate::error::{Result, WaveError};
use crate::simulation::Measurement;

/// Lifecycle of the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// Nothing sent yet.
    Uninitialized,
    /// Header line written.
    HeaderSent,
    /// Frames and analytics may be written.
    Streaming,
    /// Channels flushed; nothing more will be written.
    Terminated,
}

/// Writes protocol messages to a text channel and frames to a binary channel.
pub struct FrameEmitter<T: Write, B: Write> {
    text: T,
    binary: B,
    state: EmitterState,
    frame_cells: usize,
    frames_sent: u64,
}

impl<T: Write, B: Write> FrameEmitter<T, B> {
    /// Create an emitter over the two channels.
    pub fn new(text: T, binary: B) -> Self {
        Self {
            text,
            binary,
            state: EmitterState::Uninitialized,
            frame_cells: 0,
            frames_sent: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> EmitterState {
        self.state
    }

    /// Frames written so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    fn expect_state(&self, expected: EmitterState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(WaveError::Protocol(format!(
                "cannot {} in state {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn write_line(&mut self, message: &TextMessage) -> Result<()> {
        writeln!(self.text, "{}", message)?;
        self.text.flush()?;
        Ok(())
    }

    /// Write the header line once.
    pub fn send_header(&mut self, config: &SimConfig) -> Result<()> {
        self.expect_state(EmitterState::Uninitialized, "send header")?;
        self.write_line(&TextMessage::Header {
            nx: config.nx,
            ny: config.ny,
            dt: config.dt,
            frames_every: config.frames_every,
        })?;
        self.frame_cells = config.cell_count();
        self.state = EmitterState::HeaderSent;
        Ok(())
    }

    /// Enter the streaming state.
    pub fn start_streaming(&mut self) -> Result<()> {
        self.expect_state(EmitterState::HeaderSent, "start streaming")?;
        self.state = EmitterState::Streaming;
        Ok(())
    }

    /// Write one PERF line and one ENERGY line.
    pub fn send_measurement(&mut self, measurement: &Measurement) -> Result<()> {
        self.expect_state(EmitterState::Streaming, "send measurement")?;
        self.write_line(&TextMessage::Perf {
            step_ms_avg: measurement.step_ms_avg,
        })?;
        self.write_line(&TextMessage::Energy {
            val: measurement.energy,
        })
    }

    /// Write one full field snapshot to the binary channel.
    pub fn send_frame(&mut self, field: &[f32]) -> Result<()> {
        self.expect_state(EmitterState::Streaming, "send frame")?;
        if field.len() != self.frame_cells {
            return Err(WaveError::Protocol(format!(
                "frame has {} cells, header announced {}",
                field.len(),
                self.frame_cells
            )));
        }
        self.binary.write_all(bytemuck::cast_slice(field))?;
        self.binary.flush()?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Flush both channels and stop accepting messages.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == EmitterState::Terminated {
            return Ok(());
        }
        self.state = EmitterState::Terminated;
        self.text.flush()?;
        self.binary.flush()?;
        Ok(())
    }

    /// Release the underlying channels.
    pub fn into_inner(self) -> (T, B) {
        (self.text, self.binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineArgs;

    fn config() -> SimConfig {
        EngineArgs::from_pairs([("nx", "4"), ("ny", "3"), ("frames_every", "2")])
            .unwrap()
            .resolve()
    }

    #[test]
    fn test_lifecycle() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        assert_eq!(emitter.state(), EmitterState::Uninitialized);

        emitter.send_header(&config()).unwrap();
        assert_eq!(emitter.state(), EmitterState::HeaderSent);

        emitter.start_streaming().unwrap();
        emitter.send_frame(&[1.0; 12]).unwrap();
        emitter
            .send_measurement(&Measurement {
                step_ms_avg: 0.25,
                energy: 12.0,
            })
            .unwrap();
        emitter.finish().unwrap();
        assert_eq!(emitter.state(), EmitterState::Terminated);

        let (text, binary) = emitter.into_inner();
        let text = String::from_utf8(text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("HEADER nx=4 ny=3 dt="));
        assert!(lines[0].ends_with("frames_every=2"));
        assert_eq!(lines[1], "PERF step_ms_avg=0.250");
        assert_eq!(lines[2], "ENERGY val=1.200000e1");
        assert_eq!(binary.len(), 4 * 3 * 4);
    }

    #[test]
    fn test_frame_before_header_rejected() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        assert!(matches!(
            emitter.send_frame(&[0.0; 12]),
            Err(WaveError::Protocol(_))
        ));
    }

    #[test]
    fn test_header_only_once() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        emitter.send_header(&config()).unwrap();
        assert!(emitter.send_header(&config()).is_err());
    }

    #[test]
    fn test_wrong_frame_size_rejected() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        emitter.send_header(&config()).unwrap();
        emitter.start_streaming().unwrap();
        assert!(emitter.send_frame(&[0.0; 11]).is_err());
        assert_eq!(emitter.frames_sent(), 0);
    }

    #[test]
    fn test_nothing_after_finish() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        emitter.send_header(&config()).unwrap();
        emitter.start_streaming().unwrap();
        emitter.finish().unwrap();
        assert!(emitter.send_frame(&[0.0; 12]).is_err());
        let (_, binary) = emitter.into_inner();
        assert!(binary.is_empty());
    }

    #[test]
    fn test_frame_bytes_are_row_major_f32() {
        let mut emitter = FrameEmitter::new(Vec::new(), Vec::new());
        emitter.send_header(&config()).unwrap();
        emitter.start_streaming().unwrap();
        let field: Vec<f32> = (0..12).map(|i| i as f32).collect();
        emitter.send_frame(&field).unwrap();
        let (_, binary) = emitter.into_inner();
        let decoded: Vec<f32> = binary
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(decoded, field);
    }
}
