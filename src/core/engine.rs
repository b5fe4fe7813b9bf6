use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use super::error::Result;
use super::sampler::{CorrelatedSampler, derive_seed};
use super::stats::{
    percentile_sorted, population_std_dev, portfolio_expected_return, portfolio_volatility,
    sharpe_ratio,
};
use super::types::{
    MarketModel, SharpeRecord, SimulationConfig, SimulationResult, TemporalModel, WeightVector,
};

// Trials per RNG stream. Output depends on this and the seed, not on thread count.
pub const TRIALS_PER_BLOCK: u32 = 4096;

#[derive(Debug, Clone)]
pub struct PathSimulator {
    config: SimulationConfig,
    sampler: CorrelatedSampler,
}

impl PathSimulator {
    pub fn new(model: &MarketModel, config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let (mean, covariance) = match config.temporal_model {
            TemporalModel::YearByYear => (model.means(), model.covariance()),
            TemporalModel::SingleHorizon => {
                let t = config.horizon_years as f64;
                let mean = model.means().iter().map(|m| m * t).collect();
                let covariance = model
                    .covariance()
                    .iter()
                    .map(|row| row.iter().map(|c| c * t).collect())
                    .collect();
                (mean, covariance)
            }
        };

        let sampler = CorrelatedSampler::new(mean, &covariance)?;
        Ok(Self { config, sampler })
    }

    pub fn asset_count(&self) -> usize {
        self.sampler.dimension()
    }

    pub fn terminal_values(&self, weights: &WeightVector, stream: u64) -> Vec<f64> {
        let trials = self.config.num_simulations;
        let blocks = trials.div_ceil(TRIALS_PER_BLOCK);

        (0..blocks)
            .into_par_iter()
            .flat_map_iter(|block| {
                let start = block * TRIALS_PER_BLOCK;
                let len = TRIALS_PER_BLOCK.min(trials - start);
                self.simulate_block(weights.as_slice(), stream, block, len)
            })
            .collect()
    }

    fn simulate_block(&self, weights: &[f64], stream: u64, block: u32, len: u32) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(derive_seed(self.config.seed, stream, block as u64));
        let initial = self.config.initial_investment;

        match self.config.temporal_model {
            TemporalModel::SingleHorizon => self
                .sampler
                .draw(&mut rng, len as usize)
                .iter()
                .map(|returns| initial * (1.0 + portfolio_expected_return(weights, returns)))
                .collect(),
            TemporalModel::YearByYear => {
                let n = self.sampler.dimension();
                let mut z = vec![0.0; n];
                let mut returns = vec![0.0; n];
                (0..len)
                    .map(|_| {
                        let mut value = initial;
                        for _ in 0..self.config.horizon_years {
                            self.sampler.sample(&mut rng, &mut z, &mut returns);
                            value *= 1.0 + portfolio_expected_return(weights, &returns);
                        }
                        value
                    })
                    .collect()
            }
        }
    }

    pub fn run(&self, weights: &WeightVector, stream: u64) -> SimulationResult {
        let values = self.terminal_values(weights, stream);
        summarize(
            weights.clone(),
            values,
            self.config.initial_investment,
            self.config.extended_stats,
        )
    }
}

fn summarize(
    weights: WeightVector,
    mut values: Vec<f64>,
    initial_investment: f64,
    extended_stats: bool,
) -> SimulationResult {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;

    let (std_dev, prob_loss) = if extended_stats {
        let losses = values.iter().filter(|v| **v < initial_investment).count();
        (
            Some(population_std_dev(&values)),
            Some(losses as f64 / n),
        )
    } else {
        (None, None)
    };

    SimulationResult {
        weights,
        mean,
        median: percentile_sorted(&values, 50.0),
        p5: percentile_sorted(&values, 5.0),
        p95: percentile_sorted(&values, 95.0),
        std_dev,
        prob_loss,
    }
}

#[derive(Debug, Clone)]
pub struct ClosedFormAnalyzer {
    means: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    risk_free_rate: f64,
}

impl ClosedFormAnalyzer {
    pub fn new(model: &MarketModel) -> Self {
        Self {
            means: model.means(),
            covariance: model.covariance(),
            risk_free_rate: model.risk_free_rate(),
        }
    }

    pub fn asset_count(&self) -> usize {
        self.means.len()
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn evaluate(&self, weights: &WeightVector) -> SharpeRecord {
        let w = weights.as_slice();
        let expected_return = portfolio_expected_return(w, &self.means);
        let volatility = portfolio_volatility(w, &self.covariance);
        SharpeRecord {
            weights: weights.clone(),
            expected_return,
            volatility,
            sharpe_ratio: sharpe_ratio(expected_return, volatility, self.risk_free_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SimError;
    use crate::core::types::AssetProfile;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn ts_wise_eth() -> MarketModel {
        MarketModel::new(
            vec![
                AssetProfile::new("TS", 0.072, 0.0),
                AssetProfile::new("Wise", 0.48, 0.4143),
                AssetProfile::new("ETH", 0.4018, 0.6624),
            ],
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.14],
                vec![0.0, 0.14, 1.0],
            ],
        )
        .expect("valid market")
    }

    fn weights(raw: &[f64]) -> WeightVector {
        WeightVector::from_percentages(raw, raw.len(), 0).expect("valid weights")
    }

    fn config(model: TemporalModel, sims: u32, years: u32) -> SimulationConfig {
        SimulationConfig {
            initial_investment: 100_000.0,
            num_simulations: sims,
            horizon_years: years,
            temporal_model: model,
            seed: 42,
            extended_stats: true,
        }
    }

    #[test]
    fn single_horizon_matches_closed_form_mean() {
        let sim = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::SingleHorizon, 100_000, 5))
            .expect("simulator");
        let result = sim.run(&weights(&[52.0, 38.0, 10.0]), 0);

        let expected = 100_000.0 * (1.0 + 5.0 * (0.52 * 0.072 + 0.38 * 0.48 + 0.10 * 0.4018));
        assert_approx_tol(expected, 230_010.0, 1e-6);
        assert_approx_tol(result.mean, expected, 0.02 * expected);
        assert_approx_tol(result.median, expected, 0.02 * expected);
        assert!(result.p5 < result.median && result.median < result.p95);
    }

    #[test]
    fn single_horizon_trials_come_from_one_bulk_draw() {
        let market = ts_wise_eth();
        let sim = PathSimulator::new(&market, config(TemporalModel::SingleHorizon, 300, 5))
            .expect("simulator");
        let w = weights(&[52.0, 38.0, 10.0]);
        let values = sim.terminal_values(&w, 7);

        let mean: Vec<f64> = market.means().iter().map(|m| m * 5.0).collect();
        let covariance: Vec<Vec<f64>> = market
            .covariance()
            .iter()
            .map(|row| row.iter().map(|c| c * 5.0).collect())
            .collect();
        let sampler = CorrelatedSampler::new(mean, &covariance).expect("sampler");
        let mut rng = StdRng::seed_from_u64(derive_seed(42, 7, 0));
        let expected: Vec<f64> = sampler
            .draw(&mut rng, 300)
            .iter()
            .map(|r| 100_000.0 * (1.0 + portfolio_expected_return(w.as_slice(), r)))
            .collect();

        assert_eq!(values, expected);
    }

    #[test]
    fn zero_horizon_single_draw_returns_initial_investment() {
        let sim = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::SingleHorizon, 500, 0))
            .expect("simulator");
        let values = sim.terminal_values(&weights(&[20.0, 40.0, 40.0]), 3);
        assert_eq!(values.len(), 500);
        assert!(values.iter().all(|v| *v == 100_000.0));
    }

    #[test]
    fn year_by_year_with_zero_volatility_compounds_exactly() {
        let market = MarketModel::new(vec![AssetProfile::new("Bond", 0.05, 0.0)], vec![vec![1.0]])
            .expect("valid market");
        let sim = PathSimulator::new(&market, config(TemporalModel::YearByYear, 50, 10))
            .expect("simulator");
        let result = sim.run(&weights(&[100.0]), 0);

        let expected = 100_000.0 * 1.05_f64.powi(10);
        assert_approx_tol(result.mean, expected, 1e-6);
        assert_approx_tol(result.p5, expected, 1e-6);
        assert_approx_tol(result.p95, expected, 1e-6);
        assert_approx(result.std_dev.expect("extended stats"), 0.0);
        assert_eq!(result.prob_loss, Some(0.0));
    }

    #[test]
    fn year_by_year_mean_converges_to_compounded_expectation() {
        let sim = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::YearByYear, 60_000, 3))
            .expect("simulator");
        let result = sim.run(&weights(&[40.0, 40.0, 20.0]), 11);

        let annual: f64 = 0.40 * 0.072 + 0.40 * 0.48 + 0.20 * 0.4018;
        let expected = 100_000.0 * (1.0 + annual).powi(3);
        assert_approx_tol(result.mean, expected, 0.02 * expected);
    }

    #[test]
    fn reruns_with_same_seed_are_identical() {
        let sim = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::YearByYear, 9_000, 4))
            .expect("simulator");
        let w = weights(&[34.0, 33.0, 33.0]);

        assert_eq!(sim.terminal_values(&w, 5), sim.terminal_values(&w, 5));
        assert_ne!(sim.terminal_values(&w, 5), sim.terminal_values(&w, 6));
    }

    #[test]
    fn risk_free_only_allocation_has_no_loss_probability() {
        let sim = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::SingleHorizon, 1_000, 5))
            .expect("simulator");
        let result = sim.run(&weights(&[100.0, 0.0, 0.0]), 0);
        assert_approx_tol(result.mean, 136_000.0, 1e-6);
        assert_eq!(result.prob_loss, Some(0.0));
    }

    #[test]
    fn extended_stats_can_be_disabled() {
        let mut cfg = config(TemporalModel::SingleHorizon, 100, 1);
        cfg.extended_stats = false;
        let sim = PathSimulator::new(&ts_wise_eth(), cfg).expect("simulator");
        let result = sim.run(&weights(&[0.0, 50.0, 50.0]), 0);
        assert_eq!(result.std_dev, None);
        assert_eq!(result.prob_loss, None);
    }

    #[test]
    fn invalid_config_is_rejected_before_sampling() {
        let err = PathSimulator::new(&ts_wise_eth(), config(TemporalModel::YearByYear, 10, 0))
            .expect_err("zero horizon");
        assert!(matches!(err, SimError::InvalidConfig { .. }));
    }

    #[test]
    fn closed_form_for_pure_risk_free_allocation() {
        let analyzer = ClosedFormAnalyzer::new(&ts_wise_eth());
        let record = analyzer.evaluate(&weights(&[100.0, 0.0, 0.0]));
        assert_approx(record.expected_return, 0.072);
        assert_eq!(record.volatility, 0.0);
        assert_eq!(record.sharpe_ratio, 0.0);
    }

    #[test]
    fn closed_form_sharpe_uses_market_risk_free_rate() {
        let analyzer = ClosedFormAnalyzer::new(&ts_wise_eth());
        let record = analyzer.evaluate(&weights(&[0.0, 100.0, 0.0]));
        assert_approx(record.volatility, 0.4143);
        assert_approx(record.sharpe_ratio, (0.48 - 0.072) / 0.4143);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_simulated_quantiles_are_ordered_and_finite(
            seed in any::<u64>(),
            sims in 1u32..300,
            years in 1u32..6,
            a in 0u32..=100,
            b_share in 0u32..=100,
            year_by_year in any::<bool>(),
        ) {
            let b = (100 - a) * b_share / 100;
            let c = 100 - a - b;
            let model = if year_by_year { TemporalModel::YearByYear } else { TemporalModel::SingleHorizon };
            let mut cfg = config(model, sims, years);
            cfg.seed = seed;

            let sim = PathSimulator::new(&ts_wise_eth(), cfg).expect("simulator");
            let result = sim.run(&weights(&[a as f64, b as f64, c as f64]), 0);

            prop_assert!(result.mean.is_finite());
            prop_assert!(result.p5 <= result.median + 1e-9);
            prop_assert!(result.median <= result.p95 + 1e-9);
            let loss = result.prob_loss.expect("extended stats");
            prop_assert!((0.0..=1.0).contains(&loss));
        }
    }
}
