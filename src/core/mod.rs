mod engine;
mod error;
mod pipeline;
mod ranking;
mod sampler;
mod stats;
mod sweep;
mod types;

pub use engine::{ClosedFormAnalyzer, PathSimulator, TRIALS_PER_BLOCK};
pub use error::{Result, SimError};
pub use pipeline::{
    BALANCED_TARGET_3, CorrelationPair, RunSummary, SharpeReport, SimulationReport,
    describe_correlations, equal_weight_target, resolve_target, run_sharpe_analysis,
    run_simulation_analysis,
};
pub use ranking::{
    above_median_sharpe, closest_match, efficient_frontier, max_sharpe, rank_by_sharpe,
};
pub use sampler::{
    CorrelatedSampler, REGULARIZATION_EPSILON, cholesky_factor, derive_seed,
    draw_correlated_returns,
};
pub use stats::{
    AnnualizedStats, CorrelationStrength, TRADING_DAYS_PER_YEAR, VOLATILITY_TOLERANCE, annualize,
    estimate_correlation_matrix, log_returns, pearson_correlation, percentile,
    portfolio_expected_return, portfolio_variance, portfolio_variance_pairwise,
    portfolio_volatility, sharpe_ratio,
};
pub use sweep::{
    CandidateEvaluator, SkippedCandidate, SweepControl, SweepOutcome, SweepProgress,
    allocation_grid, sweep,
};
pub use types::{
    Allocation, AssetProfile, MarketModel, Selection, SharpeRecord, SimulationConfig,
    SimulationResult, TemporalModel, WEIGHT_SUM_TOLERANCE, WeightVector,
};
