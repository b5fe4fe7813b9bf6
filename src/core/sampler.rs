use nalgebra::{Cholesky, DMatrix};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

use super::error::{Result, SimError};

pub const REGULARIZATION_EPSILON: f64 = 1e-6;

/// Lower-triangular `L` with `L * L^T == covariance`. Assets with an all-zero
/// covariance row are left out of the factorization and get a zero row in `L`.
pub fn cholesky_factor(covariance: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let n = covariance.len();
    if covariance.iter().any(|row| row.len() != n) {
        return Err(SimError::invalid_config("covariance matrix must be square"));
    }

    let active: Vec<usize> = (0..n)
        .filter(|&i| covariance[i].iter().any(|c| *c != 0.0))
        .collect();

    let mut factor = DMatrix::zeros(n, n);
    if active.is_empty() {
        return Ok(factor);
    }

    let k = active.len();
    let block = DMatrix::from_fn(k, k, |a, b| covariance[active[a]][active[b]]);

    let lower = match Cholesky::new(block.clone()) {
        Some(c) => c.l(),
        None => {
            warn!(
                epsilon = REGULARIZATION_EPSILON,
                "covariance not positive definite; retrying with diagonal regularization"
            );
            let regularized = block + DMatrix::identity(k, k) * REGULARIZATION_EPSILON;
            Cholesky::new(regularized)
                .map(|c| c.l())
                .ok_or_else(|| SimError::non_positive_definite(covariance.to_vec()))?
        }
    };

    for (a, &i) in active.iter().enumerate() {
        for (b, &j) in active.iter().enumerate().take(a + 1) {
            factor[(i, j)] = lower[(a, b)];
        }
    }
    Ok(factor)
}

#[derive(Debug, Clone)]
pub struct CorrelatedSampler {
    mean: Vec<f64>,
    factor: DMatrix<f64>,
}

impl CorrelatedSampler {
    pub fn new(mean: Vec<f64>, covariance: &[Vec<f64>]) -> Result<Self> {
        if mean.len() != covariance.len() {
            return Err(SimError::invalid_config(format!(
                "mean has {} entries but covariance is {}x{}",
                mean.len(),
                covariance.len(),
                covariance.len()
            )));
        }
        let factor = cholesky_factor(covariance)?;
        Ok(Self { mean, factor })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Writes one correlated draw into `out`. `z` is scratch space of the same
    /// length.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, z: &mut [f64], out: &mut [f64]) {
        for zk in z.iter_mut() {
            *zk = rng.sample(StandardNormal);
        }
        correlate(&self.mean, &self.factor, z, out);
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R, n_draws: usize) -> Vec<Vec<f64>> {
        draw_correlated_returns(&self.mean, &self.factor, n_draws, rng)
    }
}

fn correlate(mean: &[f64], factor: &DMatrix<f64>, z: &[f64], out: &mut [f64]) {
    for (i, o) in out.iter_mut().enumerate() {
        let mut acc = mean[i];
        for (k, zk) in z.iter().enumerate().take(i + 1) {
            acc += factor[(i, k)] * zk;
        }
        *o = acc;
    }
}

pub fn draw_correlated_returns<R: Rng + ?Sized>(
    mean: &[f64],
    factor: &DMatrix<f64>,
    n_draws: usize,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    let n = mean.len();
    let mut z = vec![0.0; n];
    (0..n_draws)
        .map(|_| {
            for zk in z.iter_mut() {
                *zk = rng.sample(StandardNormal);
            }
            let mut row = vec![0.0; n];
            correlate(mean, factor, &z, &mut row);
            row
        })
        .collect()
}

pub fn derive_seed(base_seed: u64, stream: u64, block: u64) -> u64 {
    let mixed = base_seed ^ (stream << 32) ^ block;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
