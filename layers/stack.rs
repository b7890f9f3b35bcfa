//! The aligned multi-band environmental stack.
//!
//! A stack owns one grid geometry and an ordered list of named bands on
//! that geometry. The ordering is fixed at construction and drives the
//! column order of every downstream design matrix, so two stacks built
//! from the same configuration agree band-for-band.

use ndarray::Array2;

use crate::layers::LayerError;
use crate::layers::grid::{GridGeometry, Layer};

struct Band {
    name: String,
    values: Array2<f64>,
}

pub struct LayerStack {
    geometry: GridGeometry,
    bands: Vec<Band>,
}

impl LayerStack {
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            bands: Vec::new(),
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Append a band. The layer must sit on the stack's geometry and the
    /// name must be new.
    pub fn push(&mut self, name: &str, layer: Layer) -> Result<(), LayerError> {
        self.geometry.ensure_matches(layer.geometry(), name)?;
        if self.bands.iter().any(|b| b.name == name) {
            return Err(LayerError::DuplicateBand(name.to_string()));
        }
        self.bands.push(Band {
            name: name.to_string(),
            values: layer.into_values(),
        });
        Ok(())
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band_index(&self, name: &str) -> Result<usize, LayerError> {
        self.bands
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| LayerError::UnknownBand(name.to_string()))
    }

    pub fn band(&self, name: &str) -> Result<&Array2<f64>, LayerError> {
        let idx = self.band_index(name)?;
        Ok(&self.bands[idx].values)
    }

    /// Iterate bands in stack order.
    pub fn bands(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.bands.iter().map(|b| (b.name.as_str(), &b.values))
    }

    /// Value of band `band_idx` at (row, col).
    pub fn value(&self, band_idx: usize, row: usize, col: usize) -> f64 {
        self.bands[band_idx].values[(row, col)]
    }

    /// Fill `out` with this cell's values across all bands in stack order.
    /// Returns false when any band is no-data at the cell, in which case
    /// the contents of `out` are unspecified.
    pub fn cell_values(&self, row: usize, col: usize, out: &mut [f64]) -> bool {
        debug_assert_eq!(out.len(), self.bands.len());
        for (slot, band) in out.iter_mut().zip(&self.bands) {
            let v = band.values[(row, col)];
            if !v.is_finite() {
                return false;
            }
            *slot = v;
        }
        true
    }

    /// Cells where every band holds a finite value.
    pub fn complete_mask(&self) -> Array2<bool> {
        let mut mask = Array2::from_elem((self.geometry.rows, self.geometry.cols), true);
        for band in &self.bands {
            for (slot, &v) in mask.iter_mut().zip(band.values.iter()) {
                *slot = *slot && v.is_finite();
            }
        }
        mask
    }

    /// Blank out every band outside a region. A mask cell counts as inside
    /// when it is finite and non-zero.
    pub fn apply_mask(&mut self, mask: &Layer) -> Result<(), LayerError> {
        self.geometry.ensure_matches(mask.geometry(), "mask")?;
        for band in &mut self.bands {
            for (slot, &m) in band.values.iter_mut().zip(mask.values().iter()) {
                if !m.is_finite() || m == 0.0 {
                    *slot = f64::NAN;
                }
            }
        }
        Ok(())
    }
}
