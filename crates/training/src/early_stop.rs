//! Best-so-far tracking and patience-based stopping for one fold.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PATIENCE: usize = 10;

/// What happens to the running best when the stop fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetPolicy {
    /// Leave the running best as it was.
    #[default]
    Keep,
    /// Restore the initial values (accuracy 0, loss +inf, counter 0).
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningBest {
    pub best_val_accuracy: f32,
    pub best_val_loss: f32,
    pub stall_counter: usize,
}

impl Default for RunningBest {
    fn default() -> Self {
        Self {
            best_val_accuracy: 0.0,
            best_val_loss: f32::INFINITY,
            stall_counter: 0,
        }
    }
}

/// Outcome of one validation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochVerdict {
    /// Accuracy beat the best so far; the caller saves the "best" checkpoint.
    pub improved: bool,
    pub loss_improved: bool,
    /// The fold should end after this epoch.
    pub stop: bool,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    policy: ResetPolicy,
    best: RunningBest,
}

impl EarlyStopping {
    pub fn new(patience: usize, policy: ResetPolicy) -> Self {
        Self {
            patience,
            policy,
            best: RunningBest::default(),
        }
    }

    pub fn best(&self) -> &RunningBest {
        &self.best
    }

    /// Fold in one epoch's validation accuracy and loss.
    ///
    /// Stops once the counter exceeds `patience`, i.e. on the `patience + 1`-th
    /// consecutive epoch without an accuracy improvement.
    pub fn observe(&mut self, accuracy: f32, loss: f32) -> EpochVerdict {
        let loss_improved = loss < self.best.best_val_loss;
        if loss_improved {
            self.best.best_val_loss = loss;
        }
        let improved = accuracy > self.best.best_val_accuracy;
        if improved {
            self.best.best_val_accuracy = accuracy;
            self.best.stall_counter = 0;
        } else {
            self.best.stall_counter += 1;
        }
        let stop = self.best.stall_counter > self.patience;
        if stop && self.policy == ResetPolicy::Reset {
            self.best = RunningBest::default();
        }
        EpochVerdict {
            improved,
            loss_improved,
            stop,
        }
    }
}
