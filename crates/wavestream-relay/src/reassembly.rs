//! Reassembly of fixed-size frames from the engine's binary channel.
//!
//! Pipe reads return arbitrary chunk sizes. The assembler buffers bytes and
//! hands out exactly `nx * ny * 4` bytes per frame once the header has fixed
//! that size. Bytes that arrive before the header are kept until it does.

/// Buffers partial frames for one session.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    frame_len: Option<usize>,
    pending: Vec<u8>,
}

impl FrameAssembler {
    /// Create an assembler with no frame size yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame size in bytes, if known.
    pub fn frame_len(&self) -> Option<usize> {
        self.frame_len
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Fix the frame size and return any frames already complete.
    pub fn set_frame_len(&mut self, len: usize) -> Vec<Vec<u8>> {
        self.frame_len = Some(len);
        self.drain_frames()
    }

    /// Append bytes and return every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        self.drain_frames()
    }

    /// Drop all buffered bytes and forget the frame size.
    pub fn reset(&mut self) {
        self.frame_len = None;
        self.pending.clear();
    }

    fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        let len = match self.frame_len {
            Some(len) if len > 0 => len,
            _ => return Vec::new(),
        };

        let complete = self.pending.len() / len;
        if complete == 0 {
            return Vec::new();
        }

        let consumed = complete * len;
        let frames = self.pending[..consumed]
            .chunks_exact(len)
            .map(|chunk| chunk.to_vec())
            .collect();
        self.pending.drain(..consumed);
        frames
    }
}
