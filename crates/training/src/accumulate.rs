//! Gradient accumulation window.

/// Decides on which batches the optimizer steps.
///
/// With a window of `n`, gradients of `n` consecutive batches are summed and the
/// step happens on the last of them: batch indices `n-1, 2n-1, ...` (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationSchedule {
    window: usize,
}

impl Default for AccumulationSchedule {
    fn default() -> Self {
        Self { window: 2 }
    }
}

impl AccumulationSchedule {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn should_step(&self, batch_idx: usize) -> bool {
        (batch_idx + 1) % self.window == 0
    }

    /// Optimizer steps taken over an epoch of `batches` batches.
    pub fn steps_per_epoch(&self, batches: usize) -> usize {
        batches / self.window
    }
}
