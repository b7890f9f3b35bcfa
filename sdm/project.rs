//! Model projection onto environmental stacks and the range-change
//! summary between periods.
//!
//! A projection is per-cell: linear predictor through the logistic link,
//! rows scored in parallel. Any no-data band value makes the whole cell
//! no-data, so a surface can only shrink relative to its stack's complete
//! cells, never invent values.

use ndarray::Array2;
use rayon::prelude::*;
use thiserror::Error;

use crate::glm::sigmoid;
use crate::layers::LayerError;
use crate::layers::grid::Layer;
use crate::layers::stack::LayerStack;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error("{coefficients} coefficients cannot score {covariates} covariates plus intercept")]
    CoefficientMismatch {
        coefficients: usize,
        covariates: usize,
    },
}

/// Probability-of-presence surface for one period's stack.
///
/// `coefficients` is intercept-first, matching `subset` order.
pub fn probability_surface(
    stack: &LayerStack,
    subset: &[String],
    coefficients: &[f64],
) -> Result<Layer, ProjectionError> {
    if coefficients.len() != subset.len() + 1 {
        return Err(ProjectionError::CoefficientMismatch {
            coefficients: coefficients.len(),
            covariates: subset.len(),
        });
    }
    let bands: Vec<&Array2<f64>> = subset
        .iter()
        .map(|name| stack.band(name))
        .collect::<Result<_, LayerError>>()?;

    let geometry = *stack.geometry();
    let (rows, cols) = (geometry.rows, geometry.cols);
    let mut flat = vec![f64::NAN; rows * cols];
    flat.par_chunks_mut(cols).enumerate().for_each(|(row, out)| {
        for (col, slot) in out.iter_mut().enumerate() {
            let mut eta = coefficients[0];
            let mut complete = true;
            for (band, &beta) in bands.iter().zip(&coefficients[1..]) {
                let v = band[(row, col)];
                if !v.is_finite() {
                    complete = false;
                    break;
                }
                eta += beta * v;
            }
            if complete {
                *slot = sigmoid(eta);
            }
        }
    });

    let values = Array2::from_shape_vec((rows, cols), flat)
        .expect("surface buffer length is rows * cols by construction");
    Ok(Layer::new(geometry, values)?)
}

/// Threshold a probability surface into 1.0 (presence) / 0.0 (absence),
/// propagating no-data.
pub fn binarize(surface: &Layer, threshold: f64) -> Layer {
    let mut out = Layer::filled(*surface.geometry(), f64::NAN);
    for (slot, &p) in out
        .values_mut()
        .iter_mut()
        .zip(surface.values().iter())
    {
        if p.is_finite() {
            *slot = if p >= threshold { 1.0 } else { 0.0 };
        }
    }
    out
}

/// Cell counts of the four historical/future presence combinations, over
/// cells valid in both binary surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeMatrix {
    pub both_present: u64,
    pub gained: u64,
    pub lost: u64,
    pub both_absent: u64,
}

impl ChangeMatrix {
    pub fn compared_cells(&self) -> u64 {
        self.both_present + self.gained + self.lost + self.both_absent
    }

    pub fn historical_presence(&self) -> u64 {
        self.both_present + self.lost
    }

    pub fn future_presence(&self) -> u64 {
        self.both_present + self.gained
    }

    /// Future over historical presence-cell count. NaN when the historical
    /// surface predicts no presence at all.
    pub fn ratio(&self) -> f64 {
        self.future_presence() as f64 / self.historical_presence() as f64
    }
}

/// Cross-tabulate two binary surfaces on the shared grid.
pub fn change_matrix(
    historical: &Layer,
    future: &Layer,
) -> Result<ChangeMatrix, ProjectionError> {
    historical
        .geometry()
        .ensure_matches(future.geometry(), "range change")?;

    let mut matrix = ChangeMatrix {
        both_present: 0,
        gained: 0,
        lost: 0,
        both_absent: 0,
    };
    for (&h, &f) in historical.values().iter().zip(future.values().iter()) {
        if !h.is_finite() || !f.is_finite() {
            continue;
        }
        match (h >= 0.5, f >= 0.5) {
            (true, true) => matrix.both_present += 1,
            (false, true) => matrix.gained += 1,
            (true, false) => matrix.lost += 1,
            (false, false) => matrix.both_absent += 1,
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::grid::{GridCrs, GridGeometry};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn geometry() -> GridGeometry {
        GridGeometry::new(0.0, 2.0, 1.0, 2, 2, GridCrs::LonLat)
    }

    fn stack_with(name: &str, values: Array2<f64>) -> LayerStack {
        let mut stack = LayerStack::new(geometry());
        stack
            .push(name, Layer::new(geometry(), values).unwrap())
            .unwrap();
        stack
    }

    #[test]
    fn surface_applies_the_logistic_link() {
        let stack = stack_with("bio1", array![[0.0, 1.0], [2.0, f64::NAN]]);
        let surface =
            probability_surface(&stack, &["bio1".to_string()], &[0.0, 1.0]).unwrap();

        assert_relative_eq!(surface.value(0, 0), 0.5);
        assert_relative_eq!(surface.value(0, 1), 1.0 / (1.0 + (-1.0f64).exp()));
        assert_relative_eq!(surface.value(1, 0), 1.0 / (1.0 + (-2.0f64).exp()));
        assert!(surface.value(1, 1).is_nan());
    }

    #[test]
    fn coefficient_arity_is_checked() {
        let stack = stack_with("bio1", Array2::zeros((2, 2)));
        let err = probability_surface(&stack, &["bio1".to_string()], &[0.0]).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::CoefficientMismatch {
                coefficients: 1,
                covariates: 1
            }
        ));
    }

    #[test]
    fn unknown_band_surfaces_layer_error() {
        let stack = stack_with("bio1", Array2::zeros((2, 2)));
        let err =
            probability_surface(&stack, &["bio9".to_string()], &[0.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::Layer(LayerError::UnknownBand(_))
        ));
    }

    #[test]
    fn binarize_splits_at_the_threshold() {
        let surface =
            Layer::new(geometry(), array![[0.2, 0.6], [0.6, f64::NAN]]).unwrap();
        let binary = binarize(&surface, 0.6);

        assert_relative_eq!(binary.value(0, 0), 0.0);
        // At-threshold cells count as present.
        assert_relative_eq!(binary.value(0, 1), 1.0);
        assert_relative_eq!(binary.value(1, 0), 1.0);
        assert!(binary.value(1, 1).is_nan());
    }

    #[test]
    fn change_matrix_cross_tabulates() {
        let historical =
            Layer::new(geometry(), array![[1.0, 1.0], [0.0, f64::NAN]]).unwrap();
        let future = Layer::new(geometry(), array![[1.0, 0.0], [1.0, 1.0]]).unwrap();
        let matrix = change_matrix(&historical, &future).unwrap();

        assert_eq!(
            matrix,
            ChangeMatrix {
                both_present: 1,
                gained: 1,
                lost: 1,
                both_absent: 0
            }
        );
        assert_eq!(matrix.compared_cells(), 3);
        assert_eq!(matrix.historical_presence(), 2);
        assert_eq!(matrix.future_presence(), 2);
        assert_relative_eq!(matrix.ratio(), 1.0);
    }

    #[test]
    fn identical_surfaces_give_unit_ratio() {
        let stack = stack_with("bio1", array![[-2.0, -1.0], [1.0, 2.0]]);
        let surface =
            probability_surface(&stack, &["bio1".to_string()], &[0.0, 1.5]).unwrap();
        let binary = binarize(&surface, 0.5);
        let matrix = change_matrix(&binary, &binary).unwrap();

        assert_eq!(matrix.gained, 0);
        assert_eq!(matrix.lost, 0);
        assert!(matrix.historical_presence() > 0);
        assert_eq!(matrix.ratio(), 1.0);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let historical = Layer::filled(geometry(), 1.0);
        let other = GridGeometry::new(5.0, 2.0, 1.0, 2, 2, GridCrs::LonLat);
        let future = Layer::filled(other, 1.0);
        let err = change_matrix(&historical, &future).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::Layer(LayerError::GridMismatch { .. })
        ));
    }
}
