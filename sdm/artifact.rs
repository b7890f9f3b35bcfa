//! The promoted model artifact: everything needed to re-render surfaces
//! and audit the selection, in human-readable TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::evaluate::ThresholdReport;
use crate::select::FittedCandidate;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize model artifact: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// One fitted term with its Wald test. The intercept is a term like any
/// other, named "intercept".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactTerm {
    pub name: String,
    pub coefficient: f64,
    pub standard_error: f64,
    pub z: f64,
    pub p: f64,
    pub significant: bool,
}

/// The next-best candidate, kept compact: enough to refit or to argue
/// with the selection, not a full duplicate of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerUpSummary {
    pub covariates: Vec<String>,
    /// Intercept first, then `covariates` order.
    pub coefficients: Vec<f64>,
    pub deviance: f64,
    pub aic: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub species: String,
    pub seed: u64,
    pub evaluation_fold: u32,
    /// Every covariate offered to the selection, in stack order.
    pub candidate_bands: Vec<String>,
    /// The winning subset, in stack order.
    pub covariates: Vec<String>,
    pub terms: Vec<ArtifactTerm>,
    pub deviance: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub auc: f64,
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub runner_up: Option<RunnerUpSummary>,
}

impl ModelArtifact {
    pub fn from_run(
        species: &str,
        seed: u64,
        evaluation_fold: u32,
        candidate_bands: &[String],
        selected: &FittedCandidate,
        runner_up: Option<&FittedCandidate>,
        evaluation: &ThresholdReport,
    ) -> Self {
        let term_names =
            std::iter::once("intercept".to_string()).chain(selected.subset.iter().cloned());
        let terms = term_names
            .zip(selected.fit.coefficients.iter())
            .zip(selected.fit.standard_errors.iter())
            .zip(selected.wald.iter())
            .map(|(((name, &coefficient), &standard_error), wald)| ArtifactTerm {
                name,
                coefficient,
                standard_error,
                z: wald.z,
                p: wald.p,
                significant: wald.significant,
            })
            .collect();

        Self {
            species: species.to_string(),
            seed,
            evaluation_fold,
            candidate_bands: candidate_bands.to_vec(),
            covariates: selected.subset.clone(),
            terms,
            deviance: selected.fit.deviance,
            log_likelihood: selected.fit.log_likelihood,
            aic: selected.fit.aic,
            auc: evaluation.auc,
            threshold: evaluation.threshold,
            sensitivity: evaluation.sensitivity,
            specificity: evaluation.specificity,
            runner_up: runner_up.map(|candidate| RunnerUpSummary {
                covariates: candidate.subset.clone(),
                coefficients: candidate.fit.coefficients.to_vec(),
                deviance: candidate.fit.deviance,
                aic: candidate.fit.aic,
            }),
        }
    }

    /// Coefficients in scoring order: intercept, then `covariates`.
    pub fn coefficients(&self) -> Vec<f64> {
        self.terms.iter().map(|t| t.coefficient).collect()
    }

    pub fn to_toml(&self) -> Result<String, ArtifactError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let toml_string = fs::read_to_string(path)?;
        let artifact = toml::from_str(&toml_string)?;
        Ok(artifact)
    }
}
