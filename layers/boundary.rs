//! Country boundary polygons and their rasterization into grid masks.
//!
//! Boundaries arrive as GeoJSON (Polygon or MultiPolygon, bare or wrapped
//! in Feature/FeatureCollection). Containment uses the even-odd rule over
//! every ring, so holes need no special casing. Rasterization classifies
//! each cell by its centre.

use ndarray::Array2;
use std::fs;
use std::path::Path;

use crate::layers::LayerError;
use crate::layers::grid::{GridGeometry, Layer};
use crate::layers::proj::EqualAreaProjection;

/// A boundary as a flat list of rings in geographic degrees. Outer rings
/// and holes are not distinguished; the even-odd test handles both.
#[derive(Debug)]
pub struct BoundaryPolygon {
    rings: Vec<Vec<(f64, f64)>>,
}

impl BoundaryPolygon {
    pub fn new(rings: Vec<Vec<(f64, f64)>>) -> Self {
        Self { rings }
    }

    pub fn from_geojson_file(path: &Path) -> Result<Self, LayerError> {
        if !path.exists() {
            return Err(LayerError::MissingSource {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| LayerError::Boundary {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let mut rings = Vec::new();
        collect_rings(&value, &mut rings);
        if rings.is_empty() {
            return Err(LayerError::Boundary {
                path: path.to_path_buf(),
                detail: "no Polygon or MultiPolygon geometry found".to_string(),
            });
        }
        Ok(Self { rings })
    }

    /// Even-odd point-in-polygon over all rings.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let mut inside = false;
        for ring in &self.rings {
            let n = ring.len();
            if n < 3 {
                continue;
            }
            let mut j = n - 1;
            for i in 0..n {
                let (xi, yi) = ring[i];
                let (xj, yj) = ring[j];
                if (yi > lat) != (yj > lat) {
                    let x_cross = xj + (lat - yj) * (xi - xj) / (yi - yj);
                    if lon < x_cross {
                        inside = !inside;
                    }
                }
                j = i;
            }
        }
        inside
    }

    /// Mask layer on `target`: 1.0 where the cell centre falls inside the
    /// boundary, NaN elsewhere.
    pub fn rasterize(&self, target: &GridGeometry) -> Result<Layer, LayerError> {
        let projection = EqualAreaProjection::for_crs(&target.crs);
        let mut values = Array2::from_elem((target.rows, target.cols), f64::NAN);
        for row in 0..target.rows {
            for col in 0..target.cols {
                let (x, y) = target.cell_center(row, col);
                let (lon, lat) = match &projection {
                    Some(p) => p.inverse(x, y),
                    None => (x, y),
                };
                if self.contains(lon, lat) {
                    values[(row, col)] = 1.0;
                }
            }
        }
        Layer::new(*target, values)
    }
}

/// Walk a GeoJSON value and gather every polygon ring it carries.
fn collect_rings(value: &serde_json::Value, rings: &mut Vec<Vec<(f64, f64)>>) {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("FeatureCollection") => {
            if let Some(features) = value.get("features").and_then(|f| f.as_array()) {
                for feature in features {
                    collect_rings(feature, rings);
                }
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_rings(geometry, rings);
            }
        }
        Some("Polygon") => {
            if let Some(coords) = value.get("coordinates") {
                push_polygon(coords, rings);
            }
        }
        Some("MultiPolygon") => {
            if let Some(polygons) = value.get("coordinates").and_then(|c| c.as_array()) {
                for polygon in polygons {
                    push_polygon(polygon, rings);
                }
            }
        }
        _ => {}
    }
}

fn push_polygon(coords: &serde_json::Value, rings: &mut Vec<Vec<(f64, f64)>>) {
    let Some(ring_list) = coords.as_array() else {
        return;
    };
    for ring in ring_list {
        let Some(points) = ring.as_array() else {
            continue;
        };
        let parsed: Vec<(f64, f64)> = points
            .iter()
            .filter_map(|p| {
                let pair = p.as_array()?;
                Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
            })
            .collect();
        if parsed.len() >= 3 {
            rings.push(parsed);
        }
    }
}
