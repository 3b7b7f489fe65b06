use serde::{Deserialize, Serialize};

/// Log-linear learning rate decay with optional warm-up
///
/// Used for the position group, whose learning rate is also scaled by the
/// scene extent by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExponentialLr {
    pub lr_init: f64,
    pub lr_final: f64,
    pub max_steps: usize,
    #[serde(default)]
    pub delay_steps: usize,
    #[serde(default = "default_delay_mult")]
    pub delay_mult: f64,
}

fn default_delay_mult() -> f64 {
    1.0
}

impl Default for ExponentialLr {
    fn default() -> Self {
        Self {
            lr_init: 0.00016,
            lr_final: 0.0000016,
            max_steps: 30_000,
            delay_steps: 0,
            delay_mult: 1.0,
        }
    }
}

impl ExponentialLr {
    pub fn scaled(mut self, factor: f64) -> Self {
        self.lr_init *= factor;
        self.lr_final *= factor;
        self
    }

    /// Learning rate at `step`; zero when the group is disabled
    pub fn at(&self, step: usize) -> f64 {
        if self.lr_init == 0.0 && self.lr_final == 0.0 {
            return 0.0;
        }
        let delay_rate = if self.delay_steps > 0 {
            let t = (step as f64 / self.delay_steps as f64).clamp(0.0, 1.0);
            self.delay_mult + (1.0 - self.delay_mult) * (0.5 * std::f64::consts::PI * t).sin()
        } else {
            1.0
        };
        let t = if self.max_steps > 0 {
            (step as f64 / self.max_steps as f64).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let log_lerp = (self.lr_init.ln() * (1.0 - t) + self.lr_final.ln() * t).exp();
        delay_rate * log_lerp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_endpoints_and_midpoint() {
        let lr = ExponentialLr {
            lr_init: 1e-2,
            lr_final: 1e-4,
            max_steps: 100,
            ..Default::default()
        };
        assert_relative_eq!(lr.at(0), 1e-2, max_relative = 1e-9);
        assert_relative_eq!(lr.at(50), 1e-3, max_relative = 1e-9);
        assert_relative_eq!(lr.at(100), 1e-4, max_relative = 1e-9);
        assert_relative_eq!(lr.at(1000), 1e-4, max_relative = 1e-9);
    }

    #[test]
    fn test_warmup_delay() {
        let lr = ExponentialLr {
            lr_init: 1.0,
            lr_final: 1.0,
            max_steps: 10,
            delay_steps: 10,
            delay_mult: 0.01,
        };
        assert_relative_eq!(lr.at(0), 0.01, max_relative = 1e-9);
        assert_relative_eq!(lr.at(10), 1.0, max_relative = 1e-9);
        assert!(lr.at(5) > 0.01 && lr.at(5) < 1.0);
    }

    #[test]
    fn test_disabled_and_scaled() {
        let off = ExponentialLr {
            lr_init: 0.0,
            lr_final: 0.0,
            ..Default::default()
        };
        assert_eq!(off.at(10), 0.0);

        let lr = ExponentialLr::default().scaled(5.0);
        assert_relative_eq!(lr.at(0), 0.0008, max_relative = 1e-9);
    }
}
