use candle_nn::Optimizer;
use tracing::info;

/// Reduce the learning rate when a monitored value stops improving.
///
/// Improvement is relative: in `min` mode a value must beat
/// `best * (1 - threshold)`, in `max` mode `best * (1 + threshold)`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    maximize: bool,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    eps: f64,
    cooldown: usize,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(maximize: bool, factor: f64, patience: usize) -> Self {
        Self {
            maximize,
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 1e-6,
            eps: 1e-8,
            cooldown: 0,
            best: if maximize {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            },
            num_bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn is_better(&self, value: f64) -> bool {
        if self.maximize {
            value > self.best * (1.0 + self.threshold)
        } else {
            value < self.best * (1.0 - self.threshold)
        }
    }

    /// Feed one epoch's value; returns the new learning rate if it was reduced.
    pub fn step<O: Optimizer>(&mut self, value: f64, optimizer: &mut O) -> Option<f64> {
        if self.is_better(value) {
            self.best = value;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.patience {
            self.cooldown_counter = self.cooldown;
            self.num_bad_epochs = 0;
            let old_lr = optimizer.learning_rate();
            let new_lr = (old_lr * self.factor).max(self.min_lr);
            if old_lr - new_lr > self.eps {
                optimizer.set_learning_rate(new_lr);
                info!("Reducing learning rate to {new_lr:.4e}");
                return Some(new_lr);
            }
        }
        None
    }
}
