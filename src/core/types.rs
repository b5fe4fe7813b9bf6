use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::stats::{TRADING_DAYS_PER_YEAR, annualize, log_returns};

pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const CORRELATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProfile {
    pub name: String,
    pub expected_annual_return: f64,
    pub annual_volatility: f64,
}

impl AssetProfile {
    pub fn new(name: impl Into<String>, expected_annual_return: f64, annual_volatility: f64) -> Self {
        Self {
            name: name.into(),
            expected_annual_return,
            annual_volatility,
        }
    }

    pub fn from_daily_log_returns(name: &str, daily_log_returns: &[f64]) -> Result<Self> {
        let stats = annualize(daily_log_returns, TRADING_DAYS_PER_YEAR).map_err(|e| e.for_asset(name))?;
        Ok(Self::new(
            name,
            stats.expected_annual_return,
            stats.annual_volatility,
        ))
    }

    pub fn from_prices(name: &str, prices: &[f64]) -> Result<Self> {
        Self::from_daily_log_returns(name, &log_returns(prices))
    }

    pub fn is_risk_free(&self) -> bool {
        self.annual_volatility == 0.0
    }
}

/// The correlation matrix is stored at full asset dimension. A matrix covering
/// only the risky (non-zero volatility) assets is accepted and embedded with
/// zero off-diagonal entries for the deterministic assets.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketModel {
    assets: Vec<AssetProfile>,
    correlation: Vec<Vec<f64>>,
    risk_free_rate: f64,
}

impl MarketModel {
    pub fn new(assets: Vec<AssetProfile>, correlation: Vec<Vec<f64>>) -> Result<Self> {
        if assets.is_empty() {
            return Err(SimError::invalid_config("market must contain at least one asset"));
        }

        for asset in &assets {
            if !asset.expected_annual_return.is_finite() {
                return Err(SimError::invalid_config(format!(
                    "expected annual return of {} must be finite",
                    asset.name
                )));
            }
            if !asset.annual_volatility.is_finite() || asset.annual_volatility < 0.0 {
                return Err(SimError::invalid_config(format!(
                    "annual volatility of {} must be finite and >= 0",
                    asset.name
                )));
            }
        }

        validate_correlation(&correlation)?;
        let correlation = embed_correlation(&assets, correlation)?;
        let risk_free_rate = assets
            .iter()
            .find(|a| a.is_risk_free())
            .map(|a| a.expected_annual_return)
            .unwrap_or(0.0);

        Ok(Self {
            assets,
            correlation,
            risk_free_rate,
        })
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Result<Self> {
        if !rate.is_finite() {
            return Err(SimError::invalid_config("risk-free rate must be finite"));
        }
        self.risk_free_rate = rate;
        Ok(self)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn assets(&self) -> &[AssetProfile] {
        &self.assets
    }

    pub fn asset_names(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.name.clone()).collect()
    }

    pub fn means(&self) -> Vec<f64> {
        self.assets.iter().map(|a| a.expected_annual_return).collect()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.assets.iter().map(|a| a.annual_volatility).collect()
    }

    pub fn correlation(&self) -> &[Vec<f64>] {
        &self.correlation
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn covariance(&self) -> Vec<Vec<f64>> {
        let vols = self.volatilities();
        self.correlation
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, c)| vols[i] * vols[j] * c)
                    .collect()
            })
            .collect()
    }
}

fn validate_correlation(correlation: &[Vec<f64>]) -> Result<()> {
    let n = correlation.len();
    if let Some((i, row)) = correlation.iter().enumerate().find(|(_, row)| row.len() != n) {
        return Err(SimError::invalid_config(format!(
            "correlation matrix must be square: row {i} has {} entries, expected {n}",
            row.len()
        )));
    }

    for (i, row) in correlation.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                return Err(SimError::invalid_config(format!(
                    "correlation [{i}][{j}] = {value} must be within [-1, 1]"
                )));
            }
            if (value - correlation[j][i]).abs() > CORRELATION_TOLERANCE {
                return Err(SimError::invalid_config(format!(
                    "correlation matrix must be symmetric: [{i}][{j}] = {value}, [{j}][{i}] = {}",
                    correlation[j][i]
                )));
            }
        }
        if (row[i] - 1.0).abs() > CORRELATION_TOLERANCE {
            return Err(SimError::invalid_config(format!(
                "correlation diagonal [{i}][{i}] must be 1.0, got {}",
                row[i]
            )));
        }
    }
    Ok(())
}

fn embed_correlation(assets: &[AssetProfile], correlation: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
    let n = assets.len();
    if correlation.len() == n {
        return Ok(correlation);
    }

    let risky: Vec<usize> = (0..n).filter(|&i| !assets[i].is_risk_free()).collect();
    if correlation.len() != risky.len() {
        return Err(SimError::invalid_config(format!(
            "correlation matrix is {m}x{m}; expected {n}x{n} (all assets) or {r}x{r} (risky assets)",
            m = correlation.len(),
            r = risky.len()
        )));
    }

    let mut full = vec![vec![0.0; n]; n];
    for (i, row) in full.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    for (a, &i) in risky.iter().enumerate() {
        for (b, &j) in risky.iter().enumerate() {
            full[i][j] = correlation[a][b];
        }
    }
    Ok(full)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    pub fn from_fractions(weights: Vec<f64>) -> std::result::Result<Self, String> {
        if weights.is_empty() {
            return Err("weight vector is empty".to_string());
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(format!("weight {w} must be finite and >= 0"));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("weights sum to {sum}, expected 1.0"));
        }
        Ok(Self(weights))
    }

    /// Converts a percentage candidate (e.g. `[52, 38, 10]`). Candidates are
    /// never rescaled: one that does not sum to 100 is rejected.
    pub fn from_percentages(raw: &[f64], asset_count: usize, index: usize) -> Result<Self> {
        if raw.len() != asset_count {
            return Err(SimError::invalid_candidate(
                index,
                format!("expected {asset_count} weights, got {}", raw.len()),
            ));
        }
        let fractions = raw.iter().map(|w| w / 100.0).collect();
        Self::from_fractions(fractions).map_err(|reason| SimError::invalid_candidate(index, reason))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_percentages(&self) -> Vec<f64> {
        self.0.iter().map(|w| w * 100.0).collect()
    }

    pub fn l1_distance(&self, target: &[f64]) -> f64 {
        self.0
            .iter()
            .zip(target.iter())
            .map(|(w, t)| (w - t).abs())
            .sum()
    }
}

impl TryFrom<Vec<f64>> for WeightVector {
    type Error = String;

    fn try_from(value: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        Self::from_fractions(value)
    }
}

impl From<WeightVector> for Vec<f64> {
    fn from(value: WeightVector) -> Self {
        value.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalModel {
    YearByYear,
    // Not a fast path of YearByYear: no intermediate compounding.
    SingleHorizon,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub initial_investment: f64,
    pub num_simulations: u32,
    pub horizon_years: u32,
    pub temporal_model: TemporalModel,
    pub seed: u64,
    pub extended_stats: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_investment: 100_000.0,
            num_simulations: 10_000,
            horizon_years: 5,
            temporal_model: TemporalModel::SingleHorizon,
            seed: 42,
            extended_stats: true,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_investment.is_finite() || self.initial_investment <= 0.0 {
            return Err(SimError::invalid_config("initial investment must be > 0"));
        }
        if self.num_simulations == 0 {
            return Err(SimError::invalid_config("number of simulations must be >= 1"));
        }
        if self.temporal_model == TemporalModel::YearByYear && self.horizon_years == 0 {
            return Err(SimError::invalid_config(
                "horizon must be >= 1 year for year-by-year compounding",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub weights: WeightVector,
    pub mean: f64,
    pub median: f64,
    pub p5: f64,
    pub p95: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prob_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharpeRecord {
    pub weights: WeightVector,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

pub trait Allocation {
    fn weights(&self) -> &WeightVector;
}

impl Allocation for SimulationResult {
    fn weights(&self) -> &WeightVector {
        &self.weights
    }
}

impl Allocation for SharpeRecord {
    fn weights(&self) -> &WeightVector {
        &self.weights
    }
}

/// A record picked out of a result set, with the score that picked it
/// (Sharpe ratio for max-Sharpe, L1 distance for closest match).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection<R> {
    pub record: R,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_assets() -> Vec<AssetProfile> {
        vec![
            AssetProfile::new("TS", 0.072, 0.0),
            AssetProfile::new("Wise", 0.48, 0.4143),
            AssetProfile::new("ETH", 0.4018, 0.6624),
        ]
    }

    #[test]
    fn risky_only_correlation_is_embedded_at_full_dimension() {
        let model = MarketModel::new(three_assets(), vec![vec![1.0, 0.14], vec![0.14, 1.0]])
            .expect("valid model");

        assert_eq!(
            model.correlation(),
            &[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.14],
                vec![0.0, 0.14, 1.0],
            ]
        );
        assert_eq!(model.risk_free_rate(), 0.072);
    }

    #[test]
    fn full_and_risky_only_correlation_give_same_covariance() {
        let full = MarketModel::new(
            three_assets(),
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.14],
                vec![0.0, 0.14, 1.0],
            ],
        )
        .expect("valid model");
        let risky = MarketModel::new(three_assets(), vec![vec![1.0, 0.14], vec![0.14, 1.0]])
            .expect("valid model");

        assert_eq!(full.covariance(), risky.covariance());
        assert!((full.covariance()[1][2] - 0.4143 * 0.6624 * 0.14).abs() < 1e-15);
        assert_eq!(full.covariance()[0], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn market_rejects_malformed_correlation() {
        let asymmetric = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.2],
            vec![0.0, 0.1, 1.0],
        ];
        let err = MarketModel::new(three_assets(), asymmetric).expect_err("must reject");
        assert!(err.to_string().contains("symmetric"));

        let bad_diag = vec![vec![0.9, 0.1], vec![0.1, 1.0]];
        let err = MarketModel::new(three_assets(), bad_diag).expect_err("must reject");
        assert!(err.to_string().contains("diagonal"));

        let wrong_size = vec![vec![1.0]];
        let err = MarketModel::new(three_assets(), wrong_size).expect_err("must reject");
        assert!(matches!(err, SimError::InvalidConfig { .. }));
    }

    #[test]
    fn market_rejects_negative_volatility() {
        let mut assets = three_assets();
        assets[1].annual_volatility = -0.1;
        let err = MarketModel::new(assets, vec![vec![1.0]]).expect_err("must reject");
        assert!(err.to_string().contains("Wise"));
    }

    #[test]
    fn percentages_summing_to_ninety_are_rejected_not_rescaled() {
        let err = WeightVector::from_percentages(&[30.0, 30.0, 30.0], 3, 7).expect_err("must reject");
        match err {
            SimError::InvalidCandidate { index, reason } => {
                assert_eq!(index, 7);
                assert!(reason.contains("sum"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn percentages_with_wrong_arity_are_rejected() {
        let err = WeightVector::from_percentages(&[50.0, 50.0], 3, 0).expect_err("must reject");
        assert!(err.to_string().contains("expected 3 weights"));
    }

    #[test]
    fn percentages_convert_to_fractions() {
        let w = WeightVector::from_percentages(&[52.0, 38.0, 10.0], 3, 0).expect("valid");
        assert_eq!(w.as_slice(), &[0.52, 0.38, 0.10]);
        assert!((w.l1_distance(&[0.5, 0.4, 0.1]) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn weight_vector_deserialization_validates() {
        let ok: WeightVector = serde_json::from_str("[0.25, 0.75]").expect("valid");
        assert_eq!(ok.as_slice().len(), 2);
        assert!(serde_json::from_str::<WeightVector>("[0.25, 0.5]").is_err());
        assert!(serde_json::from_str::<WeightVector>("[-0.5, 1.5]").is_err());
    }

    #[test]
    fn simulation_config_validation() {
        let mut config = SimulationConfig::default();
        assert!(config.validate().is_ok());

        config.initial_investment = 0.0;
        assert!(config.validate().is_err());

        config = SimulationConfig::default();
        config.num_simulations = 0;
        assert!(config.validate().is_err());

        config = SimulationConfig::default();
        config.horizon_years = 0;
        assert!(config.validate().is_ok());
        config.temporal_model = TemporalModel::YearByYear;
        assert!(config.validate().is_err());
    }

    #[test]
    fn optional_stats_are_omitted_from_serialized_results() {
        let result = SimulationResult {
            weights: WeightVector::from_fractions(vec![1.0]).expect("valid"),
            mean: 1.0,
            median: 1.0,
            p5: 1.0,
            p95: 1.0,
            std_dev: None,
            prob_loss: None,
        };
        let json = serde_json::to_string(&result).expect("serializes");
        assert!(json.contains("\"p95\""));
        assert!(!json.contains("std_dev"));
    }
}
