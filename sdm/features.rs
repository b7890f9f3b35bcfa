//! The labeled feature table: presences and pseudo-absences joined to
//! their covariate values.
//!
//! Extraction reads the historical stack only; future stacks never
//! contribute training rows. A covariate may be NaN when its cell is
//! no-data, and the design-matrix builder drops such rows rather than
//! imputing. Labels and fold ids are complete by construction.

use ndarray::{Array1, Array2};
use polars::prelude::*;
use thiserror::Error;

use crate::layers::stack::LayerStack;
use crate::sample::GridCell;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{class} cells and fold ids differ in length: {cells} vs {folds}")]
    FoldMismatch {
        class: &'static str,
        cells: usize,
        folds: usize,
    },

    #[error("'{0}' is not a covariate of the feature table")]
    UnknownCovariate(String),

    #[error("failed to assemble the feature frame: {0}")]
    Frame(#[from] PolarsError),
}

/// Which rows of the table a design matrix is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldFilter {
    /// Every row.
    All,
    /// Training view: every row except the given fold.
    Exclude(u32),
    /// Held-out view: only the given fold.
    Only(u32),
}

impl FoldFilter {
    fn admits(&self, fold: u32) -> bool {
        match self {
            FoldFilter::All => true,
            FoldFilter::Exclude(held_out) => fold != *held_out,
            FoldFilter::Only(held_out) => fold == *held_out,
        }
    }
}

/// A design matrix view of the table: intercept column plus the requested
/// covariates, rows restricted by fold and to complete covariate values.
pub struct Design {
    pub matrix: Array2<f64>,
    pub response: Array1<f64>,
    /// Rows excluded because a requested covariate was no-data.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct FeatureTable {
    bands: Vec<String>,
    /// Row-major (n_points, n_bands); NaN where the cell is no-data.
    covariates: Array2<f64>,
    /// 1.0 presence, 0.0 pseudo-absence.
    labels: Vec<f64>,
    folds: Vec<u32>,
    /// Projected cell-centre coordinates, for the exported frame.
    xs: Vec<f64>,
    ys: Vec<f64>,
}

/// Join presence and absence cells to the stack's bands, presences first.
pub fn extract(
    stack: &LayerStack,
    presences: &[GridCell],
    presence_folds: &[u32],
    absences: &[GridCell],
    absence_folds: &[u32],
) -> Result<FeatureTable, FeatureError> {
    if presences.len() != presence_folds.len() {
        return Err(FeatureError::FoldMismatch {
            class: "presence",
            cells: presences.len(),
            folds: presence_folds.len(),
        });
    }
    if absences.len() != absence_folds.len() {
        return Err(FeatureError::FoldMismatch {
            class: "absence",
            cells: absences.len(),
            folds: absence_folds.len(),
        });
    }

    let bands: Vec<String> = stack.bands().map(|(name, _)| name.to_string()).collect();
    let n = presences.len() + absences.len();

    let mut covariates = Array2::from_elem((n, bands.len()), f64::NAN);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for (i, cell) in presences.iter().chain(absences).enumerate() {
        for band_idx in 0..bands.len() {
            covariates[(i, band_idx)] = stack.value(band_idx, cell.row, cell.col);
        }
        let (x, y) = stack.geometry().cell_center(cell.row, cell.col);
        xs.push(x);
        ys.push(y);
    }

    let mut labels = vec![1.0; presences.len()];
    labels.extend(std::iter::repeat_n(0.0, absences.len()));
    let mut folds = presence_folds.to_vec();
    folds.extend_from_slice(absence_folds);

    Ok(FeatureTable {
        bands,
        covariates,
        labels,
        folds,
        xs,
        ys,
    })
}

impl FeatureTable {
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    /// Map covariate names to their column indices, preserving order.
    pub fn band_indices(&self, names: &[String]) -> Result<Vec<usize>, FeatureError> {
        names
            .iter()
            .map(|name| {
                self.bands
                    .iter()
                    .position(|b| b == name)
                    .ok_or_else(|| FeatureError::UnknownCovariate(name.clone()))
            })
            .collect()
    }

    /// Build the design matrix for a covariate subset (column indices into
    /// `bands`). Rows with any NaN among the requested covariates are
    /// dropped and counted.
    pub fn design(&self, subset: &[usize], filter: FoldFilter) -> Design {
        let mut rows: Vec<f64> = Vec::new();
        let mut response = Vec::new();
        let mut dropped = 0usize;

        for i in 0..self.n_rows() {
            if !filter.admits(self.folds[i]) {
                continue;
            }
            if subset.iter().any(|&b| !self.covariates[(i, b)].is_finite()) {
                dropped += 1;
                continue;
            }
            rows.push(1.0);
            for &b in subset {
                rows.push(self.covariates[(i, b)]);
            }
            response.push(self.labels[i]);
        }

        let width = subset.len() + 1;
        let n = response.len();
        let matrix = Array2::from_shape_vec((n, width), rows)
            .expect("row buffer length is rows * width by construction");
        Design {
            matrix,
            response: Array1::from_vec(response),
            dropped,
        }
    }

    /// The table as a data frame: coordinates, label, fold, then one
    /// column per covariate in stack order.
    pub fn frame(&self) -> Result<DataFrame, FeatureError> {
        let mut columns: Vec<Column> = vec![
            Series::new("x".into(), self.xs.clone()).into(),
            Series::new("y".into(), self.ys.clone()).into(),
            Series::new("label".into(), self.labels.clone()).into(),
            Series::new("fold".into(), self.folds.clone()).into(),
        ];
        for (band_idx, band) in self.bands.iter().enumerate() {
            let values: Vec<f64> = self.covariates.column(band_idx).to_vec();
            columns.push(Series::new(band.as_str().into(), values).into());
        }
        Ok(DataFrame::new(columns)?)
    }
}
