//! Streaming protocol between the engine and its host process.
//!
//! Two independent channels:
//!
//! - **Text** (one message per line):
//!   `HEADER nx=<int> ny=<int> dt=<float> frames_every=<int>`,
//!   `PERF step_ms_avg=<float>`, `ENERGY val=<float>`.
//! - **Binary**: back-to-back frames of exactly `nx * ny * 4` bytes
//!   (row-major `f32`), with no markers. The frame size comes from the header.

mod emitter;

pub use emitter::{EmitterState, FrameEmitter};

use std::fmt;

/// One message on the text channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TextMessage {
    /// Emitted once at start.
    Header {
        nx: usize,
        ny: usize,
        dt: f64,
        frames_every: u64,
    },
    /// Average wall time per step over the last measurement window.
    Perf { step_ms_avg: f64 },
    /// Field energy at the end of the last measurement window.
    Energy { val: f64 },
    /// Any line that is not a well-formed protocol message.
    Unrecognized(String),
}

impl TextMessage {
    /// Parse one line of the text channel. Never fails: anything that is
    /// not a complete, well-typed message becomes [`TextMessage::Unrecognized`].
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();
        let tag = tokens.next().unwrap_or_default();
        let fields = Fields::collect(tokens);

        let parsed = match tag {
            "HEADER" => fields.and_then(|f| {
                Some(TextMessage::Header {
                    nx: f.get("nx")?,
                    ny: f.get("ny")?,
                    dt: f.get("dt")?,
                    frames_every: f.get("frames_every")?,
                })
            }),
            "PERF" => fields.and_then(|f| {
                Some(TextMessage::Perf {
                    step_ms_avg: f.get("step_ms_avg")?,
                })
            }),
            "ENERGY" => fields.and_then(|f| Some(TextMessage::Energy { val: f.get("val")? })),
            _ => None,
        };

        parsed.unwrap_or_else(|| TextMessage::Unrecognized(trimmed.to_string()))
    }
}

impl fmt::Display for TextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMessage::Header {
                nx,
                ny,
                dt,
                frames_every,
            } => write!(f, "HEADER nx={} ny={} dt={} frames_every={}", nx, ny, dt, frames_every),
            TextMessage::Perf { step_ms_avg } => write!(f, "PERF step_ms_avg={:.3}", step_ms_avg),
            TextMessage::Energy { val } => write!(f, "ENERGY val={:.6e}", val),
            TextMessage::Unrecognized(line) => f.write_str(line),
        }
    }
}

/// `key=value` pairs of one line.
struct Fields<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    fn collect(tokens: impl Iterator<Item = &'a str>) -> Option<Self> {
        let pairs = tokens
            .map(|token| token.split_once('='))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { pairs })
    }

    fn get<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.parse().ok())
    }
}
