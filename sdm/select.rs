//! All-subsets model search scored by AIC.
//!
//! Every non-empty subset of the stack covariates is fitted on the
//! training folds and ranked. Candidates that fail to fit stay in the
//! ranking with their failure recorded; they are only excluded from
//! promotion. The runner-up is carried alongside the winner in full,
//! because the final call between two near-tied models belongs to the
//! reader of the report, not to the pipeline.

use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use thiserror::Error;

use crate::features::{FeatureTable, FoldFilter};
use crate::glm::{self, FitError, GlmFit, WaldTest};

/// AIC differences at numerical-noise scale count as exact ties, which the
/// smaller subset wins.
const AIC_TIE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("the feature table has no covariates to select from")]
    NoCovariates,

    #[error("every candidate subset failed to fit; first failure: {0}")]
    AllCandidatesFailed(#[source] FitError),
}

/// One candidate subset's outcome, for the ranking table.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub subset: Vec<String>,
    /// Fitted parameters including the intercept.
    pub n_params: usize,
    pub outcome: CandidateOutcome,
}

#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    Fitted {
        deviance: f64,
        log_likelihood: f64,
        aic: f64,
    },
    Failed(String),
}

/// A promoted candidate with its converged fit and per-term Wald tests
/// (intercept first, then the subset in stack order).
#[derive(Debug, Clone)]
pub struct FittedCandidate {
    pub subset: Vec<String>,
    pub subset_indices: Vec<usize>,
    pub fit: GlmFit,
    pub wald: Vec<WaldTest>,
}

#[derive(Debug)]
pub struct Selection {
    /// Every candidate, converged ones first in ascending AIC order,
    /// failures after in enumeration order.
    pub ranking: Vec<CandidateRecord>,
    pub selected: FittedCandidate,
    /// Next-best converged candidate, absent only when nothing else
    /// converged.
    pub runner_up: Option<FittedCandidate>,
}

struct Scored {
    subset: Vec<usize>,
    result: Result<GlmFit, FitError>,
}

/// Fit every non-empty covariate subset on the training folds (everything
/// but `evaluation_fold`) and promote the minimum-AIC fit.
pub fn select_model(
    table: &FeatureTable,
    evaluation_fold: u32,
) -> Result<Selection, SelectError> {
    let n_bands = table.bands().len();
    if n_bands == 0 {
        return Err(SelectError::NoCovariates);
    }

    // Powerset enumeration is by subset size, then lexicographic; the
    // order is part of the tie-breaking contract.
    let subsets: Vec<Vec<usize>> = (0..n_bands)
        .powerset()
        .filter(|s| !s.is_empty())
        .collect();
    info!(
        "scoring {} candidate subsets of {} covariates",
        subsets.len(),
        n_bands
    );

    let scored: Vec<Scored> = subsets
        .into_par_iter()
        .map(|subset| {
            let design = table.design(&subset, FoldFilter::Exclude(evaluation_fold));
            let result = glm::fit_logistic(design.matrix.view(), design.response.view());
            Scored { subset, result }
        })
        .collect();

    let failures = scored.iter().filter(|s| s.result.is_err()).count();
    if failures > 0 {
        info!("{failures} of {} candidates failed to fit", scored.len());
    }

    let winner = best_converged(&scored, None);
    let Some(winner) = winner else {
        let first_failure = scored
            .into_iter()
            .find_map(|s| s.result.err())
            .expect("no winner means every candidate carries an error");
        return Err(SelectError::AllCandidatesFailed(first_failure));
    };
    let runner_up = best_converged(&scored, Some(winner));

    let ranking = build_ranking(table, &scored);
    let selected = promote(table, &scored[winner]);
    let runner_up = runner_up.map(|idx| promote(table, &scored[idx]));

    info!(
        "selected [{}] with AIC {:.3}",
        selected.subset.join(", "),
        selected.fit.aic
    );

    Ok(Selection {
        ranking,
        selected,
        runner_up,
    })
}

/// Index of the best converged candidate: minimum AIC, ties within
/// tolerance going to the smaller subset, then to enumeration order.
fn best_converged(scored: &[Scored], skip: Option<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in scored.iter().enumerate() {
        if Some(idx) == skip {
            continue;
        }
        let Ok(fit) = &candidate.result else {
            continue;
        };
        let better = match best {
            None => true,
            Some(b) => {
                let best_fit = scored[b]
                    .result
                    .as_ref()
                    .expect("best candidate is always converged");
                if fit.aic + AIC_TIE_TOLERANCE < best_fit.aic {
                    true
                } else if (fit.aic - best_fit.aic).abs() <= AIC_TIE_TOLERANCE {
                    candidate.subset.len() < scored[b].subset.len()
                } else {
                    false
                }
            }
        };
        if better {
            best = Some(idx);
        }
    }
    best
}

fn subset_names(table: &FeatureTable, subset: &[usize]) -> Vec<String> {
    subset.iter().map(|&b| table.bands()[b].clone()).collect()
}

fn promote(table: &FeatureTable, scored: &Scored) -> FittedCandidate {
    let fit = scored
        .result
        .as_ref()
        .expect("only converged candidates are promoted")
        .clone();
    let wald = glm::wald_tests(&fit);
    FittedCandidate {
        subset: subset_names(table, &scored.subset),
        subset_indices: scored.subset.clone(),
        fit,
        wald,
    }
}

fn build_ranking(table: &FeatureTable, scored: &[Scored]) -> Vec<CandidateRecord> {
    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_by(|&a, &b| match (&scored[a].result, &scored[b].result) {
        (Ok(x), Ok(y)) => x
            .aic
            .total_cmp(&y.aic)
            .then(scored[a].subset.len().cmp(&scored[b].subset.len())),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => std::cmp::Ordering::Equal,
    });

    order
        .into_iter()
        .map(|idx| {
            let candidate = &scored[idx];
            let outcome = match &candidate.result {
                Ok(fit) => CandidateOutcome::Fitted {
                    deviance: fit.deviance,
                    log_likelihood: fit.log_likelihood,
                    aic: fit.aic,
                },
                Err(e) => CandidateOutcome::Failed(e.to_string()),
            };
            CandidateRecord {
                subset: subset_names(table, &candidate.subset),
                n_params: candidate.subset.len() + 1,
                outcome,
            }
        })
        .collect()
}
