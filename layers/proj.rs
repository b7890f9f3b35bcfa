//! Pure-Rust WGS84 ↔ Lambert azimuthal equal-area conversion (Snyder 1987,
//! USGS Prof. Paper 1395, pp. 182-186, spherical formulas on the authalic
//! sphere).
//!
//! Cell areas are preserved, so presence counts over the projected grid can
//! be compared between periods without latitude corrections. No external C
//! dependencies (no libproj).

use crate::layers::grid::{GeoExtent, GridCrs, GridGeometry};

/// WGS84 authalic sphere radius (m): the sphere with the same surface area
/// as the ellipsoid.
const AUTHALIC_RADIUS: f64 = 6_371_007.181;

/// Azimuthal equal-area mapping centred on a (lon_0, lat_0) tangent point.
///
/// Points antipodal to the centre have no image; the forward conversion
/// returns non-finite coordinates there, which downstream grid lookups
/// discard. Study extents are far smaller than a hemisphere, so this never
/// triggers in practice.
#[derive(Debug, Clone, Copy)]
pub struct EqualAreaProjection {
    lon_0: f64,
    lat_0: f64,
    sin_lat0: f64,
    cos_lat0: f64,
}

impl EqualAreaProjection {
    pub fn centred_on(lon_0: f64, lat_0: f64) -> Self {
        let (sin_lat0, cos_lat0) = lat_0.to_radians().sin_cos();
        Self {
            lon_0,
            lat_0,
            sin_lat0,
            cos_lat0,
        }
    }

    /// The projection belonging to an equal-area grid, `None` for
    /// geographic grids.
    pub fn for_crs(crs: &GridCrs) -> Option<Self> {
        match crs {
            GridCrs::LonLat => None,
            GridCrs::EqualArea { lon_0, lat_0 } => Some(Self::centred_on(*lon_0, *lat_0)),
        }
    }

    /// Degrees (lon, lat) to projected metres (x, y). Snyder eqs. 22-4,
    /// 24-2.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
        let dlon = (lon_deg - self.lon_0).to_radians();
        let (sin_dlon, cos_dlon) = dlon.sin_cos();

        let denom = 1.0 + self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_dlon;
        let k = (2.0 / denom).sqrt();

        let x = AUTHALIC_RADIUS * k * cos_lat * sin_dlon;
        let y = AUTHALIC_RADIUS * k * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_dlon);
        (x, y)
    }

    /// Projected metres (x, y) back to degrees (lon, lat). Snyder eqs.
    /// 20-14, 20-15, 24-16.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let rho = x.hypot(y);
        if rho < 1e-9 {
            return (self.lon_0, self.lat_0);
        }

        let c = 2.0 * (rho / (2.0 * AUTHALIC_RADIUS)).clamp(-1.0, 1.0).asin();
        let (sin_c, cos_c) = c.sin_cos();

        let sin_lat = cos_c * self.sin_lat0 + y * sin_c * self.cos_lat0 / rho;
        let lat = sin_lat.clamp(-1.0, 1.0).asin();
        let lon = self.lon_0.to_radians()
            + (x * sin_c).atan2(rho * self.cos_lat0 * cos_c - y * self.sin_lat0 * sin_c);

        (lon.to_degrees(), lat.to_degrees())
    }

    /// Projected envelope of a geographic bounding box.
    ///
    /// The edges of the box bow outward under an azimuthal projection, so
    /// the whole perimeter is sampled rather than just the corners.
    pub fn projected_envelope(&self, extent: &GeoExtent) -> (f64, f64, f64, f64) {
        const STEPS: usize = 16;

        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;

        let lon_step = (extent.max_lon - extent.min_lon) / STEPS as f64;
        let lat_step = (extent.max_lat - extent.min_lat) / STEPS as f64;
        for i in 0..=STEPS {
            let lon = extent.min_lon + i as f64 * lon_step;
            let lat = extent.min_lat + i as f64 * lat_step;
            for (plon, plat) in [
                (lon, extent.min_lat),
                (lon, extent.max_lat),
                (extent.min_lon, lat),
                (extent.max_lon, lat),
            ] {
                let (x, y) = self.forward(plon, plat);
                if x.is_finite() && y.is_finite() {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        (min_x, min_y, max_x, max_y)
    }
}

/// Build the shared analysis grid: the smallest north-up equal-area grid of
/// the given cell size whose extent covers the projected study box.
pub fn target_grid(extent: &GeoExtent, cell: f64, lon_0: f64, lat_0: f64) -> GridGeometry {
    let projection = EqualAreaProjection::centred_on(lon_0, lat_0);
    let (min_x, min_y, max_x, max_y) = projection.projected_envelope(extent);
    let cols = ((max_x - min_x) / cell).ceil().max(1.0) as usize;
    let rows = ((max_y - min_y) / cell).ceil().max(1.0) as usize;
    GridGeometry::new(min_x, max_y, cell, cols, rows, GridCrs::EqualArea { lon_0, lat_0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn centre_maps_to_origin() {
        let p = EqualAreaProjection::centred_on(15.0, 65.0);
        let (x, y) = p.forward(15.0, 65.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    }

    // A point 90° of arc from an equatorial centre lands exactly on the
    // circle of radius R*sqrt(2) (Snyder p. 184).
    #[test]
    fn quarter_circle_from_equatorial_aspect() {
        let p = EqualAreaProjection::centred_on(0.0, 0.0);
        let r2 = AUTHALIC_RADIUS * 2.0_f64.sqrt();

        let (x, y) = p.forward(90.0, 0.0);
        assert_relative_eq!(x, r2, max_relative = 1e-12);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);

        let (x, y) = p.forward(0.0, 90.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, r2, max_relative = 1e-12);
    }

    #[test]
    fn polar_aspect_sends_equator_south() {
        let p = EqualAreaProjection::centred_on(0.0, 90.0);
        let r2 = AUTHALIC_RADIUS * 2.0_f64.sqrt();
        let (x, y) = p.forward(0.0, 0.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, -r2, max_relative = 1e-12);
    }

    #[test]
    fn forward_inverse_round_trip() {
        let p = EqualAreaProjection::centred_on(15.0, 65.0);
        for &(lon, lat) in &[
            (10.75, 59.91),
            (25.47, 70.66),
            (4.5, 58.0),
            (31.0, 62.0),
            (15.0, 65.0),
        ] {
            let (x, y) = p.forward(lon, lat);
            let (lon2, lat2) = p.inverse(x, y);
            assert_abs_diff_eq!(lon2, lon, epsilon = 1e-9);
            assert_abs_diff_eq!(lat2, lat, epsilon = 1e-9);
        }
    }

    // Near the tangent point an azimuthal projection is isometric to
    // second order, so small offsets match arc lengths on the sphere.
    #[test]
    fn local_scale_near_centre() {
        let p = EqualAreaProjection::centred_on(15.0, 65.0);

        let (x, _) = p.forward(15.1, 65.0);
        let expected_x = AUTHALIC_RADIUS * 0.1_f64.to_radians() * 65.0_f64.to_radians().cos();
        assert_relative_eq!(x, expected_x, max_relative = 1e-4);

        let (_, y) = p.forward(15.0, 65.1);
        let expected_y = AUTHALIC_RADIUS * 0.1_f64.to_radians();
        assert_relative_eq!(y, expected_y, max_relative = 1e-4);
    }

    #[test]
    fn envelope_contains_interior_points() {
        let p = EqualAreaProjection::centred_on(15.0, 65.0);
        let study = GeoExtent {
            min_lon: 4.0,
            min_lat: 57.0,
            max_lon: 32.0,
            max_lat: 71.5,
        };
        let (min_x, min_y, max_x, max_y) = p.projected_envelope(&study);
        assert!(min_x < max_x && min_y < max_y);

        for &(lon, lat) in &[(4.0, 57.0), (32.0, 71.5), (18.0, 64.0), (15.0, 71.5)] {
            let (x, y) = p.forward(lon, lat);
            assert!(x >= min_x - 1e-6 && x <= max_x + 1e-6, "x for ({lon}, {lat})");
            assert!(y >= min_y - 1e-6 && y <= max_y + 1e-6, "y for ({lon}, {lat})");
        }
    }

    #[test]
    fn target_grid_covers_the_study_box() {
        let study = GeoExtent {
            min_lon: 4.0,
            min_lat: 57.0,
            max_lon: 32.0,
            max_lat: 71.5,
        };
        let grid = target_grid(&study, 10_000.0, 15.0, 65.0);
        assert_eq!(grid.cell, 10_000.0);
        assert!(grid.cols > 0 && grid.rows > 0);

        let p = EqualAreaProjection::centred_on(15.0, 65.0);
        for &(lon, lat) in &[(4.0, 57.0), (32.0, 71.5), (15.0, 65.0)] {
            let (x, y) = p.forward(lon, lat);
            assert!(grid.locate(x, y).is_some(), "({lon}, {lat}) outside grid");
        }
    }

    #[test]
    fn for_crs_only_builds_from_equal_area() {
        assert!(EqualAreaProjection::for_crs(&GridCrs::LonLat).is_none());
        let crs = GridCrs::EqualArea {
            lon_0: 15.0,
            lat_0: 65.0,
        };
        let p = EqualAreaProjection::for_crs(&crs).unwrap();
        let (x, y) = p.forward(15.0, 65.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    }
}
