use tracing::debug;

use super::stats::percentile;
use super::types::{Allocation, Selection, SharpeRecord};

// Stable: equal ratios keep input order.
pub fn rank_by_sharpe(mut records: Vec<SharpeRecord>) -> Vec<SharpeRecord> {
    records.sort_by(|a, b| b.sharpe_ratio.total_cmp(&a.sharpe_ratio));
    records
}

fn dominates(a: &SharpeRecord, b: &SharpeRecord) -> bool {
    a.expected_return >= b.expected_return
        && a.volatility <= b.volatility
        && (a.expected_return > b.expected_return || a.volatility < b.volatility)
}

/// Non-dominated records sorted by ascending volatility.
///
/// Dominance is a strict partial order, so non-empty input always leaves at
/// least one record. The above-median and all-records fallbacks only guard an
/// empty dominance result.
pub fn efficient_frontier(records: &[SharpeRecord]) -> Vec<SharpeRecord> {
    if records.is_empty() {
        return Vec::new();
    }

    let frontier: Vec<SharpeRecord> = records
        .iter()
        .filter(|r| !records.iter().any(|other| dominates(other, r)))
        .cloned()
        .collect();

    let mut frontier = if !frontier.is_empty() {
        frontier
    } else {
        let above = above_median_sharpe(records);
        if above.is_empty() {
            debug!("frontier fallback: returning all records");
            records.to_vec()
        } else {
            debug!(count = above.len(), "frontier fallback: above-median Sharpe");
            above
        }
    };

    frontier.sort_by(|a, b| a.volatility.total_cmp(&b.volatility));
    frontier
}

pub fn above_median_sharpe(records: &[SharpeRecord]) -> Vec<SharpeRecord> {
    let mut ratios: Vec<f64> = records.iter().map(|r| r.sharpe_ratio).collect();
    let median = percentile(&mut ratios, 50.0);
    records
        .iter()
        .filter(|r| r.sharpe_ratio > median)
        .cloned()
        .collect()
}

pub fn max_sharpe(records: &[SharpeRecord]) -> Option<Selection<SharpeRecord>> {
    let mut best: Option<&SharpeRecord> = None;
    for record in records {
        if best.is_none_or(|b| record.sharpe_ratio > b.sharpe_ratio) {
            best = Some(record);
        }
    }
    best.map(|record| Selection {
        score: record.sharpe_ratio,
        record: record.clone(),
    })
}

/// Record whose weights are nearest to `target` in L1 distance. The first of
/// several equally close records wins, and an exact match ends the scan.
pub fn closest_match<R: Allocation + Clone>(records: &[R], target: &[f64]) -> Option<Selection<R>> {
    let mut best: Option<(&R, f64)> = None;
    for record in records {
        let distance = record.weights().l1_distance(target);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((record, distance));
        }
        if distance == 0.0 {
            break;
        }
    }
    best.map(|(record, score)| Selection {
        record: record.clone(),
        score,
    })
}
