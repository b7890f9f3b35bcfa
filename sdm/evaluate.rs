//! Held-out evaluation: ROC sweep, AUC, and the presence threshold.
//!
//! Candidate cutoffs are the midpoints between consecutive distinct scores,
//! with ∓∞ sentinels at the ends, so the chosen threshold always sits
//! strictly between two observed scores instead of on one. A point counts
//! as predicted-present when its score is at or above the cutoff. AUC is
//! the Mann-Whitney rank statistic, ties counted half.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("the held-out fold contains no {0} points")]
    EmptyFold(&'static str),

    #[error("a predicted score is not finite ({0})")]
    NonFiniteScore(f64),
}

/// One candidate cutoff and its confusion-derived rates.
#[derive(Debug, Clone, Copy)]
pub struct RocPoint {
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

/// Evaluation result on one held-out fold.
#[derive(Debug, Clone)]
pub struct ThresholdReport {
    /// Full sweep in ascending threshold order, from "everything present"
    /// to "everything absent".
    pub points: Vec<RocPoint>,
    pub auc: f64,
    /// The Youden-optimal cutoff: maximal sensitivity + specificity, ties
    /// resolved toward the lower threshold (favouring sensitivity).
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub n_presence: usize,
    pub n_absence: usize,
}

/// Score the held-out fold: presence and absence scores in, ROC curve,
/// AUC, and the chosen threshold out.
pub fn evaluate_scores(presence: &[f64], absence: &[f64]) -> Result<ThresholdReport, EvalError> {
    if presence.is_empty() {
        return Err(EvalError::EmptyFold("presence"));
    }
    if absence.is_empty() {
        return Err(EvalError::EmptyFold("absence"));
    }
    for &s in presence.iter().chain(absence) {
        if !s.is_finite() {
            return Err(EvalError::NonFiniteScore(s));
        }
    }

    // The -inf sentinel classifies everything present, which every sweep
    // starts from; later candidates must strictly beat the running best.
    let mut best = RocPoint {
        threshold: f64::NEG_INFINITY,
        sensitivity: 1.0,
        specificity: 0.0,
    };
    let mut points = Vec::new();
    for threshold in candidate_thresholds(presence, absence) {
        let point = RocPoint {
            threshold,
            sensitivity: fraction_at_or_above(presence, threshold),
            specificity: 1.0 - fraction_at_or_above(absence, threshold),
        };
        points.push(point);
        if point.sensitivity + point.specificity > best.sensitivity + best.specificity {
            best = point;
        }
    }

    Ok(ThresholdReport {
        points,
        auc: mann_whitney_auc(presence, absence),
        threshold: best.threshold,
        sensitivity: best.sensitivity,
        specificity: best.specificity,
        n_presence: presence.len(),
        n_absence: absence.len(),
    })
}

/// Midpoints between consecutive distinct pooled scores, bracketed by ∓∞.
fn candidate_thresholds(presence: &[f64], absence: &[f64]) -> Vec<f64> {
    let mut pooled: Vec<f64> = presence.iter().chain(absence).copied().collect();
    pooled.sort_by(f64::total_cmp);
    pooled.dedup();

    let mut thresholds = Vec::with_capacity(pooled.len() + 1);
    thresholds.push(f64::NEG_INFINITY);
    for pair in pooled.windows(2) {
        thresholds.push(0.5 * (pair[0] + pair[1]));
    }
    thresholds.push(f64::INFINITY);
    thresholds
}

fn fraction_at_or_above(scores: &[f64], threshold: f64) -> f64 {
    let hits = scores.iter().filter(|&&s| s >= threshold).count();
    hits as f64 / scores.len() as f64
}

/// P(presence score > absence score) + P(equal)/2, computed from mid-ranks
/// of the pooled sample.
fn mann_whitney_auc(presence: &[f64], absence: &[f64]) -> f64 {
    let mut pooled: Vec<(f64, bool)> = presence
        .iter()
        .map(|&s| (s, true))
        .chain(absence.iter().map(|&s| (s, false)))
        .collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut presence_rank_sum = 0.0;
    let mut start = 0;
    while start < pooled.len() {
        let mut end = start + 1;
        while end < pooled.len() && pooled[end].0 == pooled[start].0 {
            end += 1;
        }
        // 1-based ranks start+1 ..= end share the mid-rank of the tie run.
        let mid_rank = (start + 1 + end) as f64 / 2.0;
        for entry in &pooled[start..end] {
            if entry.1 {
                presence_rank_sum += mid_rank;
            }
        }
        start = end;
    }

    let n_p = presence.len() as f64;
    let n_a = absence.len() as f64;
    (presence_rank_sum - n_p * (n_p + 1.0) / 2.0) / (n_p * n_a)
}
