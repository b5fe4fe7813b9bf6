use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::{ClosedFormAnalyzer, PathSimulator};
use super::error::{Result, SimError};
use super::types::{SharpeRecord, SimulationResult, WeightVector};

// `stream` is the candidate's input index.
pub trait CandidateEvaluator: Sync {
    type Record: Send;

    fn asset_count(&self) -> usize;
    fn evaluate(&self, stream: u64, weights: &WeightVector) -> Self::Record;
}

impl CandidateEvaluator for PathSimulator {
    type Record = SimulationResult;

    fn asset_count(&self) -> usize {
        PathSimulator::asset_count(self)
    }

    fn evaluate(&self, stream: u64, weights: &WeightVector) -> SimulationResult {
        self.run(weights, stream)
    }
}

impl CandidateEvaluator for ClosedFormAnalyzer {
    type Record = SharpeRecord;

    fn asset_count(&self) -> usize {
        ClosedFormAnalyzer::asset_count(self)
    }

    fn evaluate(&self, _stream: u64, weights: &WeightVector) -> SharpeRecord {
        ClosedFormAnalyzer::evaluate(self, weights)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepProgress {
    pub processed: usize,
    pub total: usize,
}

type ProgressObserver = Box<dyn Fn(SweepProgress) + Send + Sync>;

#[derive(Default)]
pub struct SweepControl {
    cancel: Arc<AtomicBool>,
    observer: Option<ProgressObserver>,
}

impl SweepControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(SweepProgress) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn report(&self, progress: SweepProgress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub index: usize,
    pub raw: Vec<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome<R> {
    pub records: Vec<R>,
    pub skipped: Vec<SkippedCandidate>,
    pub total: usize,
    pub interrupted: bool,
}

/// Invalid candidates are logged and skipped. A raised cancel flag stops new
/// evaluations and the partial result is returned.
pub fn sweep<E: CandidateEvaluator>(
    candidates: &[Vec<f64>],
    evaluator: &E,
    control: &SweepControl,
) -> SweepOutcome<E::Record> {
    let total = candidates.len();
    let asset_count = evaluator.asset_count();

    let mut valid = Vec::with_capacity(total);
    let mut skipped = Vec::new();
    for (index, raw) in candidates.iter().enumerate() {
        match WeightVector::from_percentages(raw, asset_count, index) {
            Ok(weights) => valid.push((index, weights)),
            Err(SimError::InvalidCandidate { index, reason }) => {
                warn!(index, ?raw, %reason, "skipping candidate");
                skipped.push(SkippedCandidate {
                    index,
                    raw: raw.clone(),
                    reason,
                });
            }
            Err(other) => {
                warn!(index, ?raw, error = %other, "skipping candidate");
                skipped.push(SkippedCandidate {
                    index,
                    raw: raw.clone(),
                    reason: other.to_string(),
                });
            }
        }
    }

    let processed = AtomicUsize::new(skipped.len());
    if !skipped.is_empty() {
        control.report(SweepProgress {
            processed: skipped.len(),
            total,
        });
    }

    let records: Vec<E::Record> = valid
        .par_iter()
        .filter_map(|(index, weights)| {
            if control.is_cancelled() {
                return None;
            }
            let record = evaluator.evaluate(*index as u64, weights);
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            control.report(SweepProgress {
                processed: done,
                total,
            });
            Some(record)
        })
        .collect();

    let interrupted = control.is_cancelled() && records.len() < valid.len();
    if interrupted {
        warn!(
            evaluated = records.len(),
            total, "sweep interrupted; returning partial results"
        );
    } else {
        info!(
            evaluated = records.len(),
            skipped = skipped.len(),
            total,
            "sweep finished"
        );
    }

    SweepOutcome {
        records,
        skipped,
        total,
        interrupted,
    }
}

/// All allocations whose weights are multiples of `step_pct`, at least
/// `min_pct` each, and sum to 100. First asset varies slowest. `step_pct` must
/// divide 100 and `min_pct` must be a multiple of it.
pub fn allocation_grid(asset_count: usize, step_pct: u32, min_pct: u32) -> Result<Vec<Vec<f64>>> {
    if asset_count == 0 {
        return Err(SimError::invalid_config("allocation grid needs at least one asset"));
    }
    if step_pct == 0 || 100 % step_pct != 0 {
        return Err(SimError::invalid_config(format!(
            "grid step {step_pct}% must divide 100"
        )));
    }
    if min_pct % step_pct != 0 {
        return Err(SimError::invalid_config(format!(
            "minimum weight {min_pct}% is not a multiple of the {step_pct}% grid step"
        )));
    }
    if min_pct as usize * asset_count > 100 {
        return Err(SimError::invalid_config(format!(
            "minimum weight {min_pct}% is infeasible for {asset_count} assets"
        )));
    }

    let mut grid = Vec::new();
    let mut prefix = Vec::with_capacity(asset_count);
    fill_grid(&mut prefix, 100, asset_count, step_pct, min_pct, &mut grid);
    debug!(asset_count, step_pct, min_pct, size = grid.len(), "built allocation grid");
    Ok(grid)
}

fn fill_grid(
    prefix: &mut Vec<f64>,
    remaining: u32,
    slots: usize,
    step: u32,
    min: u32,
    grid: &mut Vec<Vec<f64>>,
) {
    if slots == 1 {
        if remaining >= min {
            let mut row = prefix.clone();
            row.push(remaining as f64);
            grid.push(row);
        }
        return;
    }

    let mut w = min;
    while w <= remaining {
        prefix.push(w as f64);
        fill_grid(prefix, remaining - w, slots - 1, step, min, grid);
        prefix.pop();
        w += step;
    }
}
