//! Geometric operations that move a band from its native grid onto the
//! shared analysis grid: cropping, block aggregation, and nearest-neighbour
//! reprojection.

use ndarray::{Array2, s};

use crate::layers::LayerError;
use crate::layers::grid::{GeoExtent, GridCrs, GridGeometry, Layer};
use crate::layers::proj::EqualAreaProjection;

/// Cut the sub-window of `source` that intersects the given box. Cells are
/// kept when any part of them overlaps, so the result covers at least the
/// requested extent where data exists.
pub fn crop(source: &Layer, extent: &GeoExtent, band: &str) -> Result<Layer, LayerError> {
    let g = source.geometry();

    let col0 = (((extent.min_lon - g.origin_x) / g.cell).floor().max(0.0)) as usize;
    let row0 = (((g.origin_y - extent.max_lat) / g.cell).floor().max(0.0)) as usize;
    let col1 = ((((extent.max_lon - g.origin_x) / g.cell).ceil()).max(0.0) as usize).min(g.cols);
    let row1 = ((((g.origin_y - extent.min_lat) / g.cell).ceil()).max(0.0) as usize).min(g.rows);

    if col0 >= col1 || row0 >= row1 {
        return Err(LayerError::NoOverlap {
            band: band.to_string(),
        });
    }

    let geometry = GridGeometry::new(
        g.origin_x + col0 as f64 * g.cell,
        g.origin_y - row0 as f64 * g.cell,
        g.cell,
        col1 - col0,
        row1 - row0,
        g.crs,
    );
    let values = source.values().slice(s![row0..row1, col0..col1]).to_owned();
    Layer::new(geometry, values)
}

/// Coarsen a band by averaging `factor` x `factor` blocks. No-data cells
/// are left out of each mean; a block with no valid cells stays no-data.
/// Partial blocks at the right/bottom edges average over the cells present.
pub fn aggregate(source: &Layer, factor: usize, band: &str) -> Result<Layer, LayerError> {
    if factor == 0 {
        return Err(LayerError::BadAggregationFactor(factor));
    }
    if factor == 1 {
        return Ok(source.clone());
    }

    let g = source.geometry();
    let out_rows = g.rows.div_ceil(factor);
    let out_cols = g.cols.div_ceil(factor);
    let mut values = Array2::from_elem((out_rows, out_cols), f64::NAN);

    for out_row in 0..out_rows {
        for out_col in 0..out_cols {
            let r0 = out_row * factor;
            let c0 = out_col * factor;
            let r1 = (r0 + factor).min(g.rows);
            let c1 = (c0 + factor).min(g.cols);

            let mut sum = 0.0;
            let mut n = 0usize;
            for r in r0..r1 {
                for c in c0..c1 {
                    let v = source.value(r, c);
                    if v.is_finite() {
                        sum += v;
                        n += 1;
                    }
                }
            }
            if n > 0 {
                values[(out_row, out_col)] = sum / n as f64;
            }
        }
    }

    let geometry = GridGeometry::new(
        g.origin_x,
        g.origin_y,
        g.cell * factor as f64,
        out_cols,
        out_rows,
        g.crs,
    );
    let layer = Layer::new(geometry, values)?;
    if layer.valid_count() == 0 {
        return Err(LayerError::NoOverlap {
            band: band.to_string(),
        });
    }
    Ok(layer)
}

/// Resample a geographic band onto `target` by nearest-neighbour lookup at
/// each target cell centre. Cells whose centre falls outside the source
/// extent come back as no-data.
pub fn project_nearest(
    source: &Layer,
    target: &GridGeometry,
    band: &str,
) -> Result<Layer, LayerError> {
    if source.geometry().crs != GridCrs::LonLat {
        return Err(LayerError::Reproject {
            band: band.to_string(),
            from: source.geometry().crs,
            to: target.crs,
        });
    }

    let projection = EqualAreaProjection::for_crs(&target.crs);
    let mut values = Array2::from_elem((target.rows, target.cols), f64::NAN);

    for row in 0..target.rows {
        for col in 0..target.cols {
            let (x, y) = target.cell_center(row, col);
            let (lon, lat) = match &projection {
                Some(p) => p.inverse(x, y),
                None => (x, y),
            };
            if let Some(v) = source.sample(lon, lat) {
                values[(row, col)] = v;
            }
        }
    }

    Layer::new(*target, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // A 1-degree global-style grid with value = longitude of cell centre.
    fn lon_gradient(cols: usize, rows: usize, origin_x: f64, origin_y: f64) -> Layer {
        let g = GridGeometry::new(origin_x, origin_y, 1.0, cols, rows, GridCrs::LonLat);
        let mut values = Array2::zeros((rows, cols));
        for row in 0..rows {
            for col in 0..cols {
                values[(row, col)] = g.cell_center(row, col).0;
            }
        }
        Layer::new(g, values).unwrap()
    }

    fn extent(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> GeoExtent {
        GeoExtent {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    #[test]
    fn crop_keeps_intersecting_cells() {
        let source = lon_gradient(10, 10, 0.0, 10.0);
        let cropped = crop(&source, &extent(2.5, 3.0, 6.5, 8.5), "bio1").unwrap();

        let g = cropped.geometry();
        assert_eq!((g.cols, g.rows), (5, 6));
        assert_relative_eq!(g.origin_x, 2.0);
        assert_relative_eq!(g.origin_y, 9.0);
        assert_relative_eq!(cropped.value(0, 0), 2.5);
    }

    #[test]
    fn crop_clamps_to_source_extent() {
        let source = lon_gradient(4, 4, 0.0, 4.0);
        let cropped = crop(&source, &extent(-10.0, -10.0, 10.0, 10.0), "bio1").unwrap();
        assert_eq!((cropped.geometry().cols, cropped.geometry().rows), (4, 4));
    }

    #[test]
    fn crop_outside_extent_fails() {
        let source = lon_gradient(4, 4, 0.0, 4.0);
        let err = crop(&source, &extent(100.0, 100.0, 110.0, 110.0), "bio1").unwrap_err();
        assert!(matches!(err, LayerError::NoOverlap { .. }));
    }

    #[test]
    fn aggregate_means_blocks_and_skips_nodata() {
        let g = GridGeometry::new(0.0, 4.0, 1.0, 4, 4, GridCrs::LonLat);
        let values = array![
            [1.0, 3.0, 10.0, 10.0],
            [5.0, 7.0, f64::NAN, 14.0],
            [f64::NAN, f64::NAN, 2.0, 2.0],
            [f64::NAN, f64::NAN, 2.0, 2.0],
        ];
        let layer = Layer::new(g, values).unwrap();
        let agg = aggregate(&layer, 2, "sand").unwrap();

        assert_eq!((agg.geometry().cols, agg.geometry().rows), (2, 2));
        assert_relative_eq!(agg.geometry().cell, 2.0);
        assert_relative_eq!(agg.value(0, 0), 4.0);
        assert_relative_eq!(agg.value(0, 1), 34.0 / 3.0);
        assert!(agg.value(1, 0).is_nan());
        assert_relative_eq!(agg.value(1, 1), 2.0);
    }

    #[test]
    fn aggregate_handles_partial_edge_blocks() {
        let g = GridGeometry::new(0.0, 3.0, 1.0, 3, 3, GridCrs::LonLat);
        let values = array![[1.0, 1.0, 4.0], [1.0, 1.0, 4.0], [6.0, 6.0, 9.0]];
        let layer = Layer::new(g, values).unwrap();
        let agg = aggregate(&layer, 2, "elev").unwrap();

        assert_eq!((agg.geometry().cols, agg.geometry().rows), (2, 2));
        assert_relative_eq!(agg.value(0, 0), 1.0);
        assert_relative_eq!(agg.value(0, 1), 4.0);
        assert_relative_eq!(agg.value(1, 0), 6.0);
        assert_relative_eq!(agg.value(1, 1), 9.0);
    }

    #[test]
    fn aggregate_factor_zero_is_rejected() {
        let source = lon_gradient(4, 4, 0.0, 4.0);
        assert!(matches!(
            aggregate(&source, 0, "elev"),
            Err(LayerError::BadAggregationFactor(0))
        ));
    }

    #[test]
    fn aggregate_factor_one_is_identity() {
        let source = lon_gradient(4, 4, 0.0, 4.0);
        let agg = aggregate(&source, 1, "elev").unwrap();
        assert!(source.geometry().matches(agg.geometry()));
        assert_relative_eq!(agg.value(2, 3), source.value(2, 3));
    }

    #[test]
    fn project_nearest_tracks_source_values() {
        // Source spans a wide box around the centre so every target cell
        // centre inverse-projects inside it, including the envelope corners
        // that bow outside the geographic box.
        let source = lon_gradient(40, 25, -5.0, 78.0);
        let projection = EqualAreaProjection::centred_on(15.0, 65.0);
        let study = extent(5.0, 58.0, 25.0, 71.0);
        let (min_x, min_y, max_x, max_y) = projection.projected_envelope(&study);

        let cell = 25_000.0;
        let cols = ((max_x - min_x) / cell).ceil() as usize;
        let rows = ((max_y - min_y) / cell).ceil() as usize;
        let target = GridGeometry::new(
            min_x,
            max_y,
            cell,
            cols,
            rows,
            GridCrs::EqualArea {
                lon_0: 15.0,
                lat_0: 65.0,
            },
        );

        let projected = project_nearest(&source, &target, "bio1").unwrap();
        assert_eq!(projected.valid_count(), target.n_cells());

        // Each projected cell holds the longitude of the nearest source
        // cell centre, which is within half a source cell of the target
        // centre's true longitude.
        for row in (0..rows).step_by(3) {
            for col in (0..cols).step_by(3) {
                let (x, y) = target.cell_center(row, col);
                let (lon, _) = projection.inverse(x, y);
                assert!((projected.value(row, col) - lon).abs() <= 0.5 + 1e-9);
            }
        }
    }

    #[test]
    fn project_nearest_marks_cells_outside_source() {
        let source = lon_gradient(2, 2, 14.0, 66.0);
        let target = GridGeometry::new(
            -300_000.0,
            300_000.0,
            50_000.0,
            12,
            12,
            GridCrs::EqualArea {
                lon_0: 15.0,
                lat_0: 65.0,
            },
        );
        let projected = project_nearest(&source, &target, "bio1").unwrap();
        assert!(projected.valid_count() < target.n_cells());
        assert!(projected.valid_count() > 0);
    }

    #[test]
    fn project_nearest_rejects_projected_source() {
        let g = GridGeometry::new(
            0.0,
            100.0,
            10.0,
            4,
            4,
            GridCrs::EqualArea {
                lon_0: 15.0,
                lat_0: 65.0,
            },
        );
        let source = Layer::new(g, Array2::zeros((4, 4))).unwrap();
        let err = project_nearest(&source, &g, "bio1").unwrap_err();
        assert!(matches!(err, LayerError::Reproject { .. }));
    }

    #[test]
    fn lonlat_to_lonlat_resample_changes_resolution() {
        let source = lon_gradient(10, 10, 0.0, 10.0);
        let target = GridGeometry::new(0.0, 10.0, 2.0, 5, 5, GridCrs::LonLat);
        let resampled = project_nearest(&source, &target, "bio1").unwrap();
        assert_eq!(resampled.valid_count(), 25);
        // Target centre (1.0, 9.0) falls in source cell column 1 (centre lon 1.5).
        assert_relative_eq!(resampled.value(0, 0), 1.5);
    }
}
