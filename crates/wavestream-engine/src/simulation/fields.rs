//! Triple-buffered field storage with index rotation.
//!
//! Three equally sized buffers hold the field at `t-1`, `t` and `t+1`.
//! Rotation only advances an index; no data moves:
//!
//! ```text
//! current  = c
//! next     = (c + 1) % 3
//! previous = (c + 2) % 3
//! ```
//!
//! After a rotation the old `previous` buffer becomes the next write target.

/// Role of a buffer relative to the current time level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Field at `t-1`.
    Previous,
    /// Field at `t`.
    Current,
    /// Field at `t+1`, written by the stencil and source stages.
    Next,
}

/// Index bookkeeping for three rotating buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rotation {
    current: usize,
}

impl Rotation {
    /// Physical buffer index for a slot.
    #[inline]
    pub fn index(self, slot: Slot) -> usize {
        match slot {
            Slot::Previous => (self.current + 2) % 3,
            Slot::Current => self.current,
            Slot::Next => (self.current + 1) % 3,
        }
    }

    /// Advance one time level.
    #[inline]
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % 3;
    }
}

/// Host-resident triple buffer.
#[derive(Debug, Clone)]
pub struct FieldSet {
    buffers: [Vec<f32>; 3],
    rotation: Rotation,
}

/// Borrowed view for one step: read-only previous/current, mutable next.
pub struct StepView<'a> {
    pub previous: &'a [f32],
    pub current: &'a [f32],
    pub next: &'a mut [f32],
}

impl FieldSet {
    /// Allocate three zeroed buffers of `len` cells.
    pub fn zeroed(len: usize) -> Self {
        Self {
            buffers: [vec![0.0; len], vec![0.0; len], vec![0.0; len]],
            rotation: Rotation::default(),
        }
    }

    /// Cells per buffer.
    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    /// Whether the buffers are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current rotation state.
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Read a slot.
    pub fn get(&self, slot: Slot) -> &[f32] {
        &self.buffers[self.rotation.index(slot)]
    }

    /// Mutable access to a slot.
    pub fn get_mut(&mut self, slot: Slot) -> &mut [f32] {
        &mut self.buffers[self.rotation.index(slot)]
    }

    /// Split into disjoint borrows for a step.
    pub fn step_view(&mut self) -> StepView<'_> {
        let [b0, b1, b2] = &mut self.buffers;
        let (previous, current, next) = match self.rotation.current {
            0 => (&b2[..], &b0[..], &mut b1[..]),
            1 => (&b0[..], &b1[..], &mut b2[..]),
            _ => (&b1[..], &b2[..], &mut b0[..]),
        };
        StepView {
            previous,
            current,
            next,
        }
    }

    /// Advance one time level.
    pub fn rotate(&mut self) {
        self.rotation.advance();
    }
}
