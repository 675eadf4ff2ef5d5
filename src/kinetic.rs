use faer::{Col, Mat};
use rand_distr::StandardNormal;

use crate::math::vector_dot;
use crate::metric::ProposalMetric;

/// Gaussian kinetic energy, independent of the position parameter.
///
/// Parameterized by the inverse mass matrix Σ (the posterior covariance
/// estimate) and a factor `W` with `W·Wᵀ = Σ⁻¹` so momentum is drawn from
/// `N(0, Σ⁻¹)`. All operations are pure functions of the cached
/// factorization; the whole struct is replaced whenever the covariance
/// estimate changes.
#[derive(Debug, Clone)]
pub struct GaussianKineticEnergy {
    sigma: Mat<f64>,
    mass_chol: Mat<f64>,
}

impl GaussianKineticEnergy {
    /// Standard normal kinetic energy.
    pub fn unit(dim: usize) -> Self {
        Self {
            sigma: Mat::identity(dim, dim),
            mass_chol: Mat::identity(dim, dim),
        }
    }

    pub fn from_metric(metric: &ProposalMetric) -> Self {
        Self {
            sigma: metric.sigma().clone(),
            mass_chol: metric.mass_chol().clone(),
        }
    }

    pub fn dim(&self) -> usize {
        self.sigma.nrows()
    }

    /// Inverse mass matrix Σ.
    pub fn sigma(&self) -> &Mat<f64> {
        &self.sigma
    }

    /// Draw a momentum from `N(0, Σ⁻¹)`.
    pub fn sample_momentum<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Col<f64> {
        let noise = Col::from_fn(self.dim(), |_| {
            let value: f64 = rng.sample(StandardNormal);
            value
        });
        &self.mass_chol * &noise
    }

    /// Gradient of the kinetic energy, `Σ·ρ`.
    ///
    /// This is the velocity term the leapfrog integrator consumes.
    pub fn gradient(&self, momentum: &Col<f64>) -> Col<f64> {
        &self.sigma * momentum
    }

    /// Kinetic energy `ρᵀ·Σ·ρ / 2`.
    pub fn energy(&self, momentum: &Col<f64>) -> f64 {
        let velocity = self.gradient(momentum);
        0.5 * vector_dot(momentum.as_slice(), velocity.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricSettings, MetricVariant, ProposalMetric};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn diag_energy(entries: [f64; 2]) -> GaussianKineticEnergy {
        let sigma = Mat::from_fn(2, 2, |i, j| if i == j { entries[i] } else { 0. });
        let settings = MetricSettings {
            variant: MetricVariant::Dense,
            ..MetricSettings::default()
        };
        let metric = ProposalMetric::with_sigma(settings, 2, sigma).unwrap();
        GaussianKineticEnergy::from_metric(&metric)
    }

    #[test]
    fn energy_and_gradient_match_hand_computation() {
        let energy = diag_energy([2., 0.5]);
        let momentum = Col::from_fn(2, |i| [1., 2.][i]);

        let gradient = energy.gradient(&momentum);
        assert_abs_diff_eq!(gradient.as_slice()[0], 2.);
        assert_abs_diff_eq!(gradient.as_slice()[1], 1.);
        assert_abs_diff_eq!(energy.energy(&momentum), 2.);
    }

    #[test]
    fn unit_energy_is_half_squared_norm() {
        let energy = GaussianKineticEnergy::unit(3);
        let momentum = Col::from_fn(3, |i| [1., -2., 3.][i]);
        assert_abs_diff_eq!(energy.energy(&momentum), 7.);
    }

    #[test]
    fn momentum_covariance_tracks_inverse_mass() {
        // With Σ = diag(4, 1), momentum draws have variance diag(1/4, 1).
        let energy = diag_energy([4., 1.]);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);

        let n = 20_000;
        let mut sums = [0f64; 2];
        let mut squares = [0f64; 2];
        for _ in 0..n {
            let momentum = energy.sample_momentum(&mut rng);
            let momentum = momentum.as_slice();
            for i in 0..2 {
                sums[i] += momentum[i];
                squares[i] += momentum[i] * momentum[i];
            }
        }
        for i in 0..2 {
            let mean = sums[i] / n as f64;
            let variance = squares[i] / n as f64 - mean * mean;
            let expected = if i == 0 { 0.25 } else { 1. };
            assert_abs_diff_eq!(mean, 0., epsilon = 0.05);
            assert_abs_diff_eq!(variance, expected, epsilon = 0.05);
        }
    }
}
