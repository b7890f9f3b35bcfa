//! Grid geometry and single-band rasters.
//!
//! Every environmental band in a run lives on one shared grid: same origin,
//! same cell size, same dimensions, same reference system. The geometry is
//! constructed once from the run configuration; any band that arrives on a
//! different geometry is a hard error, never silently resampled.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::layers::LayerError;

/// Reference system tag for a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GridCrs {
    /// WGS84 geographic coordinates in degrees (native layout of the
    /// downloaded climate/soil/elevation rasters).
    LonLat,
    /// Lambert azimuthal equal-area in meters, centred on the given
    /// longitude/latitude. Area-preserving, so presence-cell counts are
    /// directly comparable across the study extent.
    EqualArea { lon_0: f64, lat_0: f64 },
}

impl fmt::Display for GridCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridCrs::LonLat => write!(f, "WGS84 lon/lat"),
            GridCrs::EqualArea { lon_0, lat_0 } => {
                write!(f, "LAEA({lon_0:.3}, {lat_0:.3})")
            }
        }
    }
}

/// Geographic bounding box in degrees, used to crop native rasters and to
/// derive the projected analysis grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoExtent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl fmt::Display for GeoExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// North-up grid definition: top-left corner origin, square cells, y
/// decreasing with row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// X coordinate of the top-left corner of cell (0, 0).
    pub origin_x: f64,
    /// Y coordinate of the top-left corner of cell (0, 0).
    pub origin_y: f64,
    /// Cell edge length (same units as the reference system axes).
    pub cell: f64,
    pub cols: usize,
    pub rows: usize,
    pub crs: GridCrs,
}

impl GridGeometry {
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        cell: f64,
        cols: usize,
        rows: usize,
        crs: GridCrs,
    ) -> Self {
        Self {
            origin_x,
            origin_y,
            cell,
            cols,
            rows,
            crs,
        }
    }

    pub fn n_cells(&self) -> usize {
        self.cols * self.rows
    }

    /// Coordinates of the center of cell (row, col).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.cell;
        let y = self.origin_y - (row as f64 + 0.5) * self.cell;
        (x, y)
    }

    /// Cell containing the point (x, y), or `None` when the point falls
    /// outside the grid extent.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = (x - self.origin_x) / self.cell;
        let row = (self.origin_y - y) / self.cell;
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some((row, col))
    }

    /// Extent as (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.origin_x,
            self.origin_y - self.rows as f64 * self.cell,
            self.origin_x + self.cols as f64 * self.cell,
            self.origin_y,
        )
    }

    /// Cell-alignment test: identical dimensions and reference system, and
    /// origin/cell agreeing to within a millionth of a cell.
    pub fn matches(&self, other: &GridGeometry) -> bool {
        let tol = self.cell.abs() * 1e-6;
        self.cols == other.cols
            && self.rows == other.rows
            && self.crs == other.crs
            && (self.cell - other.cell).abs() <= tol
            && (self.origin_x - other.origin_x).abs() <= tol
            && (self.origin_y - other.origin_y).abs() <= tol
    }

    /// Fail-fast alignment check used wherever two grids are combined.
    pub fn ensure_matches(&self, other: &GridGeometry, band: &str) -> Result<(), LayerError> {
        if self.matches(other) {
            Ok(())
        } else {
            Err(LayerError::GridMismatch {
                band: band.to_string(),
                expected: Box::new(*self),
                found: Box::new(*other),
            })
        }
    }
}

impl fmt::Display for GridGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {} [origin ({:.3}, {:.3}), {}]",
            self.cols, self.rows, self.cell, self.origin_x, self.origin_y, self.crs
        )
    }
}

/// A single georeferenced band. NaN marks no-data cells.
#[derive(Debug, Clone)]
pub struct Layer {
    geometry: GridGeometry,
    values: Array2<f64>,
}

impl Layer {
    /// Wrap an array of cell values; the array shape must agree with the
    /// geometry's (rows, cols).
    pub fn new(geometry: GridGeometry, values: Array2<f64>) -> Result<Self, LayerError> {
        if values.dim() != (geometry.rows, geometry.cols) {
            return Err(LayerError::ShapeMismatch {
                expected_rows: geometry.rows,
                expected_cols: geometry.cols,
                found_rows: values.nrows(),
                found_cols: values.ncols(),
            });
        }
        Ok(Self { geometry, values })
    }

    /// A layer filled with one value everywhere.
    pub fn filled(geometry: GridGeometry, value: f64) -> Self {
        let values = Array2::from_elem((geometry.rows, geometry.cols), value);
        Self { geometry, values }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    /// Cell value by index. Panics on out-of-range indices, like direct
    /// `ndarray` indexing; callers locate cells through the geometry first.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[(row, col)]
    }

    /// Nearest-cell lookup at a point, `None` outside the grid extent. The
    /// returned value may still be NaN (no-data cell).
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.geometry.locate(x, y)?;
        Some(self.values[(row, col)])
    }

    /// Number of non-NaN cells.
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Min/max over valid cells, `None` when the band is all no-data.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for &v in self.values.iter() {
            if !v.is_finite() {
                continue;
            }
            range = Some(match range {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            });
        }
        range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn geom(cols: usize, rows: usize) -> GridGeometry {
        GridGeometry::new(0.0, 100.0, 10.0, cols, rows, GridCrs::LonLat)
    }

    #[test]
    fn cell_center_and_locate_roundtrip() {
        let g = geom(10, 10);
        let (x, y) = g.cell_center(3, 7);
        assert_relative_eq!(x, 75.0);
        assert_relative_eq!(y, 65.0);
        assert_eq!(g.locate(x, y), Some((3, 7)));
    }

    #[test]
    fn locate_rejects_points_outside() {
        let g = geom(4, 4);
        assert_eq!(g.locate(-0.1, 50.0), None);
        assert_eq!(g.locate(5.0, 100.1), None);
        assert_eq!(g.locate(40.1, 50.0), None);
        assert_eq!(g.locate(5.0, 59.9), None);
    }

    #[test]
    fn bounds_cover_full_extent() {
        let g = geom(4, 3);
        assert_eq!(g.bounds(), (0.0, 70.0, 40.0, 100.0));
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let a = geom(4, 4);
        let mut b = a;
        b.origin_x += 5.0;
        assert!(a.matches(&a));
        assert!(!a.matches(&b));
        assert!(a.ensure_matches(&b, "bio1").is_err());
    }

    #[test]
    fn layer_shape_must_match_geometry() {
        let g = geom(3, 2);
        let err = Layer::new(g, Array2::zeros((3, 3))).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn sample_returns_nearest_cell() {
        let g = GridGeometry::new(0.0, 2.0, 1.0, 2, 2, GridCrs::LonLat);
        let layer = Layer::new(g, array![[1.0, 2.0], [3.0, f64::NAN]]).unwrap();
        assert_eq!(layer.sample(0.2, 1.9), Some(1.0));
        assert_eq!(layer.sample(1.7, 1.2), Some(2.0));
        assert_eq!(layer.sample(2.2, 1.2), None);
        assert!(layer.sample(1.5, 0.5).unwrap().is_nan());
        assert_eq!(layer.valid_count(), 3);
    }
}
