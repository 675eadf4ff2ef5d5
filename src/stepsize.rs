/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    /// Relaxation exponent for the averaged log step size.
    pub k: f64,
    /// Iteration offset damping early updates.
    pub t0: f64,
    /// Regularization scale.
    pub gamma: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

/// Step size and target acceptance configuration.
#[derive(Debug, Clone, Copy)]
pub struct StepSizeSettings {
    /// Target mean acceptance rate.
    pub target_accept: f64,
    /// Step size used before the initial search has run.
    pub initial_step: f64,
    pub params: DualAverageOptions,
}

impl Default for StepSizeSettings {
    fn default() -> Self {
        Self {
            target_accept: 0.8,
            initial_step: 0.1,
            params: DualAverageOptions::default(),
        }
    }
}

const STEP_SIZE_LOWER: f64 = 1e-10;
const STEP_SIZE_UPPER: f64 = 1e10;

/// Dual averaging of the log step size toward a target acceptance rate.
///
/// The proposal bias `mu` keeps early log steps above the seed value, so
/// adaptation does not collapse into pathologically small step sizes.
#[derive(Debug, Clone)]
pub struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub fn advance(&mut self, accept_stat: f64, target: f64) {
        // A NaN acceptance rate comes from a failed trajectory upstream and
        // counts as a full rejection.
        let accept_stat = if accept_stat.is_nan() {
            0.
        } else {
            accept_stat.clamp(0., 1.)
        };
        let w = 1. / (self.count as f64 + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step = self.mu - self.hbar * (self.count as f64).sqrt() / self.settings.gamma;
        self.log_step = self
            .log_step
            .clamp(STEP_SIZE_LOWER.ln(), STEP_SIZE_UPPER.ln());
        let mk = (self.count as f64).powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    pub fn reset(&mut self, initial_step: f64, bias_factor: f64) {
        self.log_step = initial_step.ln();
        self.log_step_adapted = initial_step.ln();
        self.hbar = 0f64;
        self.mu = (bias_factor * initial_step).ln();
        self.count = 1;
    }
}

pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub(crate) fn new() -> RunningMean {
        RunningMean { sum: 0., count: 0 }
    }

    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stationary_at_target() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 0.1);
        let mu_step = adapt.mu.exp();
        for _ in 0..1000 {
            adapt.advance(0.8, 0.8);
        }
        // With the observed rate exactly at the target the error average
        // stays zero and the log step never moves off the bias point.
        assert_eq!(adapt.hbar, 0.);
        assert_eq!(adapt.current_step_size(), mu_step);
    }

    #[test]
    fn nan_counts_as_rejection() {
        let mut with_nan = DualAverage::new(DualAverageOptions::default(), 0.1);
        let mut with_zero = with_nan.clone();
        with_nan.advance(f64::NAN, 0.8);
        with_zero.advance(0., 0.8);
        assert_eq!(with_nan.current_step_size(), with_zero.current_step_size());
        assert!(with_nan.current_step_size().is_finite());
    }

    #[test]
    fn acceptance_is_clamped() {
        let mut high = DualAverage::new(DualAverageOptions::default(), 0.1);
        let mut one = high.clone();
        high.advance(2.5, 0.8);
        one.advance(1., 0.8);
        assert_eq!(high.current_step_size(), one.current_step_size());
    }

    proptest! {
        #[test]
        fn monotone_under_constant_surplus(
            target in 0.5f64..0.9,
            surplus in 0.01f64..0.1,
        ) {
            let accept = (target + surplus).min(1.);
            let mut adapt = DualAverage::new(DualAverageOptions::default(), 0.1);
            let mut last = f64::NEG_INFINITY;
            for _ in 0..100 {
                adapt.advance(accept, target);
                let current = adapt.log_step;
                prop_assert!(current >= last);
                last = current;
            }
        }

        #[test]
        fn shrinks_under_constant_deficit(
            target in 0.5f64..0.9,
            deficit in 0.01f64..0.4,
        ) {
            let accept = (target - deficit).max(0.);
            let mut adapt = DualAverage::new(DualAverageOptions::default(), 0.1);
            let mut last = f64::INFINITY;
            for _ in 0..100 {
                adapt.advance(accept, target);
                let current = adapt.log_step;
                prop_assert!(current <= last);
                last = current;
            }
        }
    }
}
