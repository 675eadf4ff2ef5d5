use std::collections::VecDeque;

use faer::{Mat, Scale};
use thiserror::Error;

use crate::math::{cholesky_lower, invert_lower_transpose};

/// Structural family of the estimated posterior covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricVariant {
    /// Full sample covariance.
    Dense,
    /// Per coordinate variances, off-diagonals forced to zero.
    Diagonal,
    /// Identity matrix, no estimation.
    Unit,
}

/// Settings for covariance estimation.
#[derive(Debug, Clone, Copy)]
pub struct MetricSettings {
    pub variant: MetricVariant,
    /// Weight of the isotropic shrinkage target, in [0, 1].
    pub shrinkage: f64,
    /// Smallest buffer size the estimator will run on.
    pub min_samples: usize,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            variant: MetricVariant::Diagonal,
            shrinkage: 0.05,
            min_samples: 3,
        }
    }
}

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("covariance estimate is not positive definite (dim {dim}, {n_samples} samples)")]
    NotPositiveDefinite { dim: usize, n_samples: usize },
}

/// Posterior covariance estimate and its factorizations.
///
/// Draws are buffered between mass matrix windows; `adapt` turns the buffer
/// into a regularized covariance estimate and clears it. Both Σ and the
/// factor of Σ⁻¹ are kept, the former scales velocities in the kernel, the
/// latter generates momentum draws.
#[derive(Debug)]
pub struct ProposalMetric {
    settings: MetricSettings,
    dim: usize,
    draws: VecDeque<Vec<f64>>,
    sigma: Mat<f64>,
    sigma_chol: Mat<f64>,
    sigma_inv: Mat<f64>,
    mass_chol: Mat<f64>,
}

impl ProposalMetric {
    /// New metric state seeded with the identity.
    pub fn new(settings: MetricSettings, dim: usize) -> Self {
        Self {
            settings,
            dim,
            draws: VecDeque::with_capacity(100),
            sigma: Mat::identity(dim, dim),
            sigma_chol: Mat::identity(dim, dim),
            sigma_inv: Mat::identity(dim, dim),
            mass_chol: Mat::identity(dim, dim),
        }
    }

    /// New metric state seeded with a prior covariance.
    pub fn with_sigma(
        settings: MetricSettings,
        dim: usize,
        sigma: Mat<f64>,
    ) -> Result<Self, MetricError> {
        assert!(sigma.nrows() == dim);
        assert!(sigma.ncols() == dim);
        let mut metric = Self::new(settings, dim);
        let factored = Factorization::new(sigma, 0)?;
        metric.install(factored);
        Ok(metric)
    }

    /// Append a draw to the estimation buffer.
    pub fn observe(&mut self, draw: &[f64]) {
        if self.settings.variant == MetricVariant::Unit {
            return;
        }
        assert!(draw.len() == self.dim);
        self.draws.push_back(draw.to_vec());
    }

    /// Recompute the covariance estimate from the buffered draws.
    ///
    /// Returns `Ok(true)` if the estimate changed. With fewer than
    /// `min_samples` buffered draws the previous estimate is kept and the
    /// buffer is retained. A numerically non-positive-definite estimate is
    /// retried once with full shrinkage before failing.
    pub fn adapt(&mut self) -> Result<bool, MetricError> {
        if self.settings.variant == MetricVariant::Unit {
            return Ok(false);
        }
        let n_samples = self.draws.len();
        if n_samples < self.settings.min_samples.max(2) {
            return Ok(false);
        }

        let raw = match self.settings.variant {
            MetricVariant::Dense => dense_covariance(&self.draws, self.dim),
            MetricVariant::Diagonal => diagonal_covariance(&self.draws, self.dim),
            MetricVariant::Unit => unreachable!(),
        };

        let factored = Factorization::regularized(&raw, self.settings.shrinkage, n_samples)
            .or_else(|_| Factorization::regularized(&raw, 1., n_samples))?;
        self.install(factored);
        self.draws.clear();
        Ok(true)
    }

    pub(crate) fn clear(&mut self) {
        self.draws.clear();
    }

    pub fn n_buffered(&self) -> usize {
        self.draws.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn variant(&self) -> MetricVariant {
        self.settings.variant
    }

    /// Current covariance estimate Σ.
    pub fn sigma(&self) -> &Mat<f64> {
        &self.sigma
    }

    /// Lower Cholesky factor of Σ.
    pub fn sigma_chol(&self) -> &Mat<f64> {
        &self.sigma_chol
    }

    /// Inverse covariance Σ⁻¹, the mass matrix.
    pub fn sigma_inv(&self) -> &Mat<f64> {
        &self.sigma_inv
    }

    /// Factor `W` with `W·Wᵀ = Σ⁻¹`, used to draw momentum.
    pub fn mass_chol(&self) -> &Mat<f64> {
        &self.mass_chol
    }

    fn install(&mut self, factored: Factorization) {
        self.sigma = factored.sigma;
        self.sigma_chol = factored.sigma_chol;
        self.sigma_inv = factored.sigma_inv;
        self.mass_chol = factored.mass_chol;
    }
}

struct Factorization {
    sigma: Mat<f64>,
    sigma_chol: Mat<f64>,
    sigma_inv: Mat<f64>,
    mass_chol: Mat<f64>,
}

impl Factorization {
    fn new(sigma: Mat<f64>, n_samples: usize) -> Result<Self, MetricError> {
        let dim = sigma.ncols();
        let sigma_chol =
            cholesky_lower(&sigma).ok_or(MetricError::NotPositiveDefinite { dim, n_samples })?;
        let mass_chol = invert_lower_transpose(&sigma_chol);
        let sigma_inv = &mass_chol * mass_chol.transpose();
        Ok(Self {
            sigma,
            sigma_chol,
            sigma_inv,
            mass_chol,
        })
    }

    /// Shrink the raw estimate toward an isotropic target and factor it.
    ///
    /// The target scale is the mean of the raw diagonal, so full shrinkage
    /// preserves the overall magnitude of the estimate.
    fn regularized(raw: &Mat<f64>, shrinkage: f64, n_samples: usize) -> Result<Self, MetricError> {
        let dim = raw.ncols();
        let scale = (0..dim).map(|i| raw[(i, i)]).sum::<f64>() / dim as f64;
        let sigma = Mat::from_fn(dim, dim, |i, j| {
            let mut value = (1. - shrinkage) * raw[(i, j)];
            if i == j {
                value += shrinkage * scale;
            }
            value
        });
        Self::new(sigma, n_samples)
    }
}

fn column_means(draws: &VecDeque<Vec<f64>>, dim: usize) -> Vec<f64> {
    let mut means = vec![0f64; dim];
    for draw in draws {
        for (mean, &value) in means.iter_mut().zip(draw.iter()) {
            *mean += value;
        }
    }
    let n = draws.len() as f64;
    means.iter_mut().for_each(|mean| *mean /= n);
    means
}

fn dense_covariance(draws: &VecDeque<Vec<f64>>, dim: usize) -> Mat<f64> {
    let n = draws.len();
    let means = column_means(draws, dim);

    let mut centered: Mat<f64> = Mat::zeros(dim, n);
    for (col, draw) in draws.iter().enumerate() {
        let out = centered.col_as_slice_mut(col);
        for ((out, &value), &mean) in out.iter_mut().zip(draw.iter()).zip(means.iter()) {
            *out = value - mean;
        }
    }

    let mut raw = &centered * centered.transpose();
    raw *= Scale(((n - 1) as f64).recip());
    raw
}

fn diagonal_covariance(draws: &VecDeque<Vec<f64>>, dim: usize) -> Mat<f64> {
    let n = draws.len();
    let means = column_means(draws, dim);

    let mut variances = vec![0f64; dim];
    for draw in draws {
        for ((var, &value), &mean) in variances.iter_mut().zip(draw.iter()).zip(means.iter()) {
            let delta = value - mean;
            *var += delta * delta;
        }
    }
    let denom = (n - 1) as f64;
    Mat::from_fn(dim, dim, |i, j| {
        if i == j {
            variances[i] / denom
        } else {
            0.
        }
    })
}
