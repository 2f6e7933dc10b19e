/// Learning rate multiplied by `gamma` every `step_size` epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    pub base_lr: f64,
    pub step_size: usize,
    pub gamma: f64,
}

impl StepDecay {
    pub fn new(base_lr: f64, step_size: usize) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma: 0.5,
        }
    }

    /// Learning rate used during zero-based `epoch`.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = (epoch / self.step_size.max(1)) as i32;
        self.base_lr * self.gamma.powi(decays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_every_step() {
        let decay = StepDecay::new(1e-3, 20);
        assert_eq!(decay.lr_at(0), 1e-3);
        assert_eq!(decay.lr_at(19), 1e-3);
        assert!((decay.lr_at(20) - 5e-4).abs() < 1e-12);
        assert!((decay.lr_at(45) - 2.5e-4).abs() < 1e-12);
    }
}
