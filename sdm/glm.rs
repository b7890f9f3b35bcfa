//! Logistic regression fitted by iteratively reweighted least squares
//! (Fisher scoring).
//!
//! The response is binary, so the saturated log-likelihood is zero and the
//! binomial deviance equals minus twice the log-likelihood; AIC follows as
//! `deviance + 2 * n_parameters`. Degenerate designs are surfaced, never
//! papered over: a singular weighted system, a fit that will not converge,
//! and (quasi-)perfect separation each produce their own error.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use ndarray_linalg::{Inverse, Solve};
use thiserror::Error;

const MAX_ITERATIONS: usize = 50;
/// Relative deviance-change convergence criterion, matching the standard
/// GLM stopping rule.
const CONVERGENCE_TOL: f64 = 1e-8;
const MIN_WEIGHT: f64 = 1e-6;
const PROB_EPS: f64 = 1e-8;
/// A linear predictor beyond this magnitude means fitted probabilities are
/// numerically 0 or 1, the signature of separation.
const ETA_SEPARATION_BOUND: f64 = 30.0;

const SIGNIFICANCE_LEVEL: f64 = 0.05;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("weighted design matrix is singular: {0}")]
    Singular(String),

    #[error("fit failed to converge within {0} iterations")]
    DidNotConverge(usize),

    #[error("perfect or near-perfect separation (max |linear predictor| = {0:.1})")]
    Separation(f64),

    #[error("{rows} usable rows is too few for {params} parameters")]
    TooFewRows { rows: usize, params: usize },

    #[error("response values must be 0 or 1, found {0}")]
    BadResponse(f64),

    #[error("design and response row counts differ: {design} vs {response}")]
    RowMismatch { design: usize, response: usize },
}

/// A converged logistic fit. Coefficient order follows the design matrix
/// columns (intercept first, by construction of the callers).
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub coefficients: Array1<f64>,
    pub covariance: Array2<f64>,
    pub standard_errors: Array1<f64>,
    pub deviance: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub iterations: usize,
}

/// Two-sided Wald test of one coefficient against zero.
#[derive(Debug, Clone, Copy)]
pub struct WaldTest {
    pub z: f64,
    pub p: f64,
    pub significant: bool,
}

/// Fit label ~ design by Fisher scoring. The design matrix must already
/// carry its intercept column.
pub fn fit_logistic(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<GlmFit, FitError> {
    let rows = x.nrows();
    let params = x.ncols();
    if rows != y.len() {
        return Err(FitError::RowMismatch {
            design: rows,
            response: y.len(),
        });
    }
    if rows <= params {
        return Err(FitError::TooFewRows { rows, params });
    }
    if let Some(&bad) = y.iter().find(|v| **v != 0.0 && **v != 1.0) {
        return Err(FitError::BadResponse(bad));
    }

    let mut beta = Array1::zeros(params);
    let mut eta = x.dot(&beta);
    let (mut mu, mut weights, mut z) = working_vectors(y, &eta);
    let mut deviance = binomial_deviance(y, &mu);

    let mut converged = false;
    let mut iterations = 0;
    while iterations < MAX_ITERATIONS {
        iterations += 1;

        let xtwx = weighted_normal_matrix(x, &weights);
        let wz = &weights * &z;
        let xtwz = x.t().dot(&wz);
        beta = xtwx
            .solve(&xtwz)
            .map_err(|e| FitError::Singular(e.to_string()))?;

        eta = x.dot(&beta);
        (mu, weights, z) = working_vectors(y, &eta);
        let new_deviance = binomial_deviance(y, &mu);
        let delta = (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1);
        deviance = new_deviance;
        if delta < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    let max_abs_eta = eta.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    if max_abs_eta > ETA_SEPARATION_BOUND {
        return Err(FitError::Separation(max_abs_eta));
    }
    if !converged {
        return Err(FitError::DidNotConverge(MAX_ITERATIONS));
    }

    let covariance = weighted_normal_matrix(x, &weights)
        .inv()
        .map_err(|e| FitError::Singular(e.to_string()))?;
    let standard_errors = covariance.diag().mapv(f64::sqrt);

    let log_likelihood = -0.5 * deviance;
    let aic = deviance + 2.0 * params as f64;

    Ok(GlmFit {
        coefficients: beta,
        covariance,
        standard_errors,
        deviance,
        log_likelihood,
        aic,
        iterations,
    })
}

/// Wald z and two-sided p for every coefficient of a fit.
pub fn wald_tests(fit: &GlmFit) -> Vec<WaldTest> {
    fit.coefficients
        .iter()
        .zip(fit.standard_errors.iter())
        .map(|(&b, &se)| {
            let z = if se > 0.0 { b / se } else { f64::INFINITY };
            let p = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);
            WaldTest {
                z,
                p,
                significant: p < SIGNIFICANCE_LEVEL,
            }
        })
        .collect()
}

/// Inverse logit with the same overflow clamp the fitter uses.
pub fn sigmoid(eta: f64) -> f64 {
    let e = eta.clamp(-700.0, 700.0);
    1.0 / (1.0 + (-e).exp())
}

/// Per-iteration mean, weight, and working-response vectors.
fn working_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
    let mut mu = eta_clamped.mapv(|e| 1.0 / (1.0 + (-e).exp()));
    // Keep mu strictly inside (0, 1) so weights and deviance stay finite.
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));

    let residual = &y.to_owned() - &mu;
    let z = &eta_clamped + &(&residual / &weights);
    (mu, weights, z)
}

fn weighted_normal_matrix(x: ArrayView2<f64>, weights: &Array1<f64>) -> Array2<f64> {
    let mut wx = x.to_owned();
    for (mut row, &w) in wx.rows_mut().into_iter().zip(weights.iter()) {
        row *= w;
    }
    x.t().dot(&wx)
}

fn binomial_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS { yi * (yi.ln() - mui_c.ln()) } else { 0.0 };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total
}

fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF, Abramowitz-Stegun style rational approximation.
fn normal_cdf(x: f64) -> f64 {
    let z = x.abs().clamp(0.0, 30.0);
    let t = 1.0 / (1.0 + 0.231_641_9 * z);
    let poly = (((((1.330_274_429 * t - 1.821_255_978) * t) + 1.781_477_937) * t - 0.356_563_782)
        * t
        + 0.319_381_530)
        * t;
    let cdf_pos = 1.0 - normal_pdf(z) * poly;
    if x >= 0.0 { cdf_pos } else { 1.0 - cdf_pos }
}
