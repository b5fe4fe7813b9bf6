use serde::Serialize;

use super::error::{Result, SimError};

pub const TRADING_DAYS_PER_YEAR: u32 = 252;

pub const VOLATILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnualizedStats {
    pub expected_annual_return: f64,
    pub annual_volatility: f64,
    pub mean_daily_log_return: f64,
    pub std_daily_log_return: f64,
    pub observations: usize,
}

/// `ln(p[t] / p[t-1])` for consecutive prices. Non-positive prices yield
/// non-finite entries and are dropped.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .filter(|r| r.is_finite())
        .collect()
}

pub fn annualize(daily_log_returns: &[f64], days_per_year: u32) -> Result<AnnualizedStats> {
    if daily_log_returns.len() < 2 {
        return Err(SimError::insufficient_data(2, daily_log_returns.len()));
    }

    let days = days_per_year as f64;
    let mu = mean(daily_log_returns);
    let sigma = population_std_dev(daily_log_returns);

    Ok(AnnualizedStats {
        expected_annual_return: (mu * days).exp() - 1.0,
        annual_volatility: sigma * days.sqrt(),
        mean_daily_log_return: mu,
        std_daily_log_return: sigma,
        observations: daily_log_returns.len(),
    })
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn portfolio_expected_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, m)| w * m).sum()
}

pub fn portfolio_variance(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    weights
        .iter()
        .zip(covariance.iter())
        .map(|(wi, row)| {
            wi * row
                .iter()
                .zip(weights.iter())
                .map(|(c, wj)| c * wj)
                .sum::<f64>()
        })
        .sum()
}

/// `sum_i w_i^2 sigma_i^2 + 2 sum_{i<j} w_i w_j sigma_i sigma_j rho_ij`
pub fn portfolio_variance_pairwise(
    weights: &[f64],
    volatilities: &[f64],
    correlation: &[Vec<f64>],
) -> f64 {
    let n = weights.len();
    let mut variance = 0.0;
    for i in 0..n {
        variance += weights[i] * weights[i] * volatilities[i] * volatilities[i];
        for j in (i + 1)..n {
            variance +=
                2.0 * weights[i] * weights[j] * volatilities[i] * volatilities[j] * correlation[i][j];
        }
    }
    variance
}

pub fn portfolio_volatility(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    portfolio_variance(weights, covariance).max(0.0).sqrt()
}

pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility <= VOLATILITY_TOLERANCE {
        return 0.0;
    }
    (expected_return - risk_free_rate) / volatility
}

/// Pearson correlation of two equal-length series. `None` when the series
/// are too short, differ in length, or either one has zero variance.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let mx = mean(x);
    let my = mean(y);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    if vx <= 0.0 || vy <= 0.0 {
        return None;
    }
    Some((cov / (vx * vy).sqrt()).clamp(-1.0, 1.0))
}

/// Builds a correlation matrix from per-asset return series. Series are
/// aligned on their most recent observations, truncated to the shortest one.
/// Pairs involving a constant series get zero correlation.
pub fn estimate_correlation_matrix(return_series: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let aligned_len = return_series.iter().map(Vec::len).min().unwrap_or(0);
    if aligned_len < 2 {
        return Err(SimError::insufficient_data(2, aligned_len));
    }

    let aligned: Vec<&[f64]> = return_series
        .iter()
        .map(|s| &s[s.len() - aligned_len..])
        .collect();

    let n = aligned.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let rho = pearson_correlation(aligned[i], aligned[j]).unwrap_or(0.0);
            matrix[i][j] = rho;
            matrix[j][i] = rho;
        }
    }
    Ok(matrix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationStrength {
    StrongPositive,
    ModeratePositive,
    Weak,
    ModerateNegative,
    StrongNegative,
}

impl CorrelationStrength {
    pub fn classify(rho: f64) -> Self {
        if rho > 0.7 {
            Self::StrongPositive
        } else if rho > 0.3 {
            Self::ModeratePositive
        } else if rho > -0.3 {
            Self::Weak
        } else if rho > -0.7 {
            Self::ModerateNegative
        } else {
            Self::StrongNegative
        }
    }
}

impl std::fmt::Display for CorrelationStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::StrongPositive => "strong positive",
            Self::ModeratePositive => "moderate positive",
            Self::Weak => "weak",
            Self::ModerateNegative => "moderate negative",
            Self::StrongNegative => "strong negative",
        };
        f.write_str(label)
    }
}

// Sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}
