// ============================================================
// Layer 5 — Learning-Rate Schedule
// ============================================================
// Stepped once per epoch by the training engine, after the
// validation pass. The optimiser reads `lr()` on every batch.
//
//   StepLr: lr = initial · gamma^(epoch / step_size)

/// An epoch-indexed learning-rate policy.
pub trait LrSchedule {
    /// Learning rate for the current epoch
    fn lr(&self) -> f64;

    /// Advance one epoch; returns the new learning rate
    fn step(&mut self) -> f64;
}

#[derive(Debug, Clone)]
pub struct StepLr {
    initial: f64,
    step_size: usize,
    gamma: f64,
    epoch: usize,
}

impl StepLr {
    /// `step_size` of 0 is treated as "never decay".
    pub fn new(initial: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            initial,
            step_size,
            gamma,
            epoch: 0,
        }
    }
}

impl LrSchedule for StepLr {
    fn lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.initial;
        }
        let decays = (self.epoch / self.step_size) as i32;
        self.initial * self.gamma.powi(decays)
    }

    fn step(&mut self) -> f64 {
        self.epoch += 1;
        self.lr()
    }
}
