use serde::Serialize;
use tracing::info;

use super::engine::{ClosedFormAnalyzer, PathSimulator};
use super::error::{Result, SimError};
use super::ranking::{closest_match, efficient_frontier, max_sharpe, rank_by_sharpe};
use super::stats::CorrelationStrength;
use super::sweep::{SkippedCandidate, SweepControl, SweepOutcome, sweep};
use super::types::{MarketModel, Selection, SharpeRecord, SimulationConfig, SimulationResult};

/// Reference allocation for a three-asset market: 52% risk-free, 38%, 10%.
pub const BALANCED_TARGET_3: [f64; 3] = [0.52, 0.38, 0.10];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub interrupted: bool,
    pub skipped_candidates: Vec<SkippedCandidate>,
}

impl RunSummary {
    fn from_outcome<R>(outcome: &SweepOutcome<R>) -> Self {
        Self {
            total: outcome.total,
            processed: outcome.records.len(),
            skipped: outcome.skipped.len(),
            interrupted: outcome.interrupted,
            skipped_candidates: outcome.skipped.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharpeReport {
    pub summary: RunSummary,
    pub risk_free_rate: f64,
    pub ranked: Vec<SharpeRecord>,
    pub frontier: Vec<SharpeRecord>,
    pub max_sharpe: Option<Selection<SharpeRecord>>,
    pub closest_match: Option<Selection<SharpeRecord>>,
    pub equal_weight_match: Option<Selection<SharpeRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub summary: RunSummary,
    pub results: Vec<SimulationResult>,
    pub closest_match: Option<Selection<SimulationResult>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
    pub strength: CorrelationStrength,
}

pub fn equal_weight_target(asset_count: usize) -> Vec<f64> {
    vec![1.0 / asset_count as f64; asset_count]
}

pub fn resolve_target(asset_count: usize, target: Option<Vec<f64>>) -> Result<Option<Vec<f64>>> {
    match target {
        Some(t) if t.len() != asset_count => Err(SimError::invalid_config(format!(
            "target allocation has {} weights, market has {asset_count} assets",
            t.len()
        ))),
        Some(t) => Ok(Some(t)),
        None if asset_count == BALANCED_TARGET_3.len() => Ok(Some(BALANCED_TARGET_3.to_vec())),
        None => Ok(None),
    }
}

/// `target` is in fractions.
pub fn run_sharpe_analysis(
    model: &MarketModel,
    candidates: &[Vec<f64>],
    target: Option<Vec<f64>>,
    control: &SweepControl,
) -> Result<SharpeReport> {
    let target = resolve_target(model.asset_count(), target)?;
    let analyzer = ClosedFormAnalyzer::new(model);
    let outcome = sweep(candidates, &analyzer, control);
    let summary = RunSummary::from_outcome(&outcome);

    let records = outcome.records;
    let frontier = efficient_frontier(&records);
    let best = max_sharpe(&records);
    let closest = target.as_deref().and_then(|t| closest_match(&records, t));
    let equal_weight = closest_match(&records, &equal_weight_target(model.asset_count()));
    let ranked = rank_by_sharpe(records);

    if let Some(best) = &best {
        info!(
            sharpe = best.score,
            weights = ?best.record.weights.to_percentages(),
            "max Sharpe allocation"
        );
    }
    info!(
        processed = summary.processed,
        frontier = frontier.len(),
        "sharpe analysis complete"
    );

    Ok(SharpeReport {
        summary,
        risk_free_rate: analyzer.risk_free_rate(),
        ranked,
        frontier,
        max_sharpe: best,
        closest_match: closest,
        equal_weight_match: equal_weight,
    })
}

pub fn run_simulation_analysis(
    model: &MarketModel,
    config: SimulationConfig,
    candidates: &[Vec<f64>],
    target: Option<Vec<f64>>,
    control: &SweepControl,
) -> Result<SimulationReport> {
    let target = resolve_target(model.asset_count(), target)?;
    let simulator = PathSimulator::new(model, config)?;
    info!(
        candidates = candidates.len(),
        simulations = config.num_simulations,
        horizon_years = config.horizon_years,
        model = ?config.temporal_model,
        seed = config.seed,
        "starting simulation sweep"
    );

    let outcome = sweep(candidates, &simulator, control);
    let summary = RunSummary::from_outcome(&outcome);
    let closest = target
        .as_deref()
        .and_then(|t| closest_match(&outcome.records, t));

    Ok(SimulationReport {
        summary,
        results: outcome.records,
        closest_match: closest,
    })
}

pub fn describe_correlations(model: &MarketModel) -> Vec<CorrelationPair> {
    let names = model.asset_names();
    let corr = model.correlation();
    let mut pairs = Vec::new();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            pairs.push(CorrelationPair {
                first: names[i].clone(),
                second: names[j].clone(),
                correlation: corr[i][j],
                strength: CorrelationStrength::classify(corr[i][j]),
            });
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sweep::allocation_grid;
    use crate::core::types::{AssetProfile, TemporalModel};

    fn market() -> MarketModel {
        MarketModel::new(
            vec![
                AssetProfile::new("TS", 0.072, 0.0),
                AssetProfile::new("Wise", 0.48, 0.4143),
                AssetProfile::new("ETH", 0.4018, 0.6624),
            ],
            vec![vec![1.0, 0.14], vec![0.14, 1.0]],
        )
        .expect("valid market")
    }

    #[test]
    fn sharpe_analysis_over_grid() {
        let grid = allocation_grid(3, 5, 0).expect("grid");
        let report = run_sharpe_analysis(&market(), &grid, None, &SweepControl::new())
            .expect("analysis");

        assert_eq!(report.summary.total, 231);
        assert_eq!(report.summary.processed, 231);
        assert_eq!(report.risk_free_rate, 0.072);

        let best = report.max_sharpe.expect("max sharpe");
        assert_eq!(report.ranked[0].sharpe_ratio, best.score);

        let balanced = report.closest_match.expect("closest");
        assert!(balanced.score > 0.0);
        assert!(balanced.score <= 0.04 + 1e-9);

        let equal = report.equal_weight_match.expect("equal weight");
        assert!(equal.score < 0.1);

        for pair in report.frontier.windows(2) {
            assert!(pair[0].volatility <= pair[1].volatility);
        }
    }

    #[test]
    fn pure_risk_free_candidate_has_zero_sharpe() {
        let report = run_sharpe_analysis(
            &market(),
            &[vec![100.0, 0.0, 0.0]],
            None,
            &SweepControl::new(),
        )
        .expect("analysis");
        let record = &report.ranked[0];
        assert_eq!(record.volatility, 0.0);
        assert_eq!(record.sharpe_ratio, 0.0);
    }

    #[test]
    fn simulation_report_counts_skipped_candidates() {
        let config = SimulationConfig {
            num_simulations: 500,
            temporal_model: TemporalModel::YearByYear,
            horizon_years: 2,
            ..SimulationConfig::default()
        };
        let candidates = vec![
            vec![52.0, 38.0, 10.0],
            vec![30.0, 30.0, 30.0],
            vec![0.0, 50.0, 50.0],
        ];
        let report =
            run_simulation_analysis(&market(), config, &candidates, None, &SweepControl::new())
                .expect("analysis");

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.skipped_candidates[0].index, 1);

        let closest = report.closest_match.expect("closest");
        assert_eq!(closest.score, 0.0);
        assert_eq!(closest.record.weights.as_slice(), &[0.52, 0.38, 0.10]);
    }

    #[test]
    fn target_arity_is_checked() {
        let err = run_sharpe_analysis(
            &market(),
            &[vec![100.0, 0.0, 0.0]],
            Some(vec![0.5, 0.5]),
            &SweepControl::new(),
        )
        .expect_err("bad target");
        assert!(matches!(err, SimError::InvalidConfig { .. }));
    }

    #[test]
    fn correlations_are_labelled() {
        let pairs = describe_correlations(&market());
        assert_eq!(pairs.len(), 3);
        let wise_eth = pairs
            .iter()
            .find(|p| p.first == "Wise" && p.second == "ETH")
            .expect("pair present");
        assert_eq!(wise_eth.correlation, 0.14);
        assert_eq!(wise_eth.strength, CorrelationStrength::Weak);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let report = run_sharpe_analysis(&market(), &[vec![10.0]], None, &SweepControl::new())
            .expect("analysis");
        let json = serde_json::to_value(&report).expect("serializes");
        assert_eq!(json["summary"]["skippedCandidates"][0]["index"], 0);
        assert!(json["maxSharpe"].is_null());
    }
}
