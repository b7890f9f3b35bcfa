//! Raster sources: where band data comes from and how it becomes a layer
//! on the shared analysis grid.
//!
//! A source yields its band on the NATIVE grid of the data product (global
//! geographic rasters for the climate, elevation, and soil downloads). The
//! assembly chain then crops to the study box, coarsens fine products to
//! the analysis resolution, and reprojects onto the shared grid.
//!
//! Georeferencing is declared per source in the run configuration rather
//! than parsed out of GeoTIFF tags; the decoder cross-checks the declared
//! dimensions against the file and refuses mismatches.

use log::info;
use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};

use crate::layers::LayerError;
use crate::layers::grid::{GeoExtent, GridGeometry, Layer};
use crate::layers::resample::{aggregate, crop, project_nearest};
use crate::layers::stack::LayerStack;

/// One band's worth of raster data on its native grid.
pub trait RasterSource {
    fn name(&self) -> &str;

    fn load(&self) -> Result<Layer, LayerError>;

    /// Block size for coarsening the native resolution to the analysis
    /// resolution before reprojection. 1 means the native resolution is
    /// already coarse enough.
    fn aggregate_factor(&self) -> usize {
        1
    }
}

/// A single-image GeoTIFF on disk with declared georeferencing.
pub struct GeoTiffSource {
    pub name: String,
    pub path: PathBuf,
    pub geometry: GridGeometry,
    pub nodata: Option<f64>,
    pub aggregate: usize,
}

impl RasterSource for GeoTiffSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Layer, LayerError> {
        decode_geotiff(&self.path, self.geometry, self.nodata)
    }

    fn aggregate_factor(&self) -> usize {
        self.aggregate
    }
}

/// Decode the first image of a GeoTIFF into a layer on the declared grid,
/// mapping the nodata sentinel (and any non-finite samples) to NaN.
pub fn decode_geotiff(
    path: &Path,
    geometry: GridGeometry,
    nodata: Option<f64>,
) -> Result<Layer, LayerError> {
    if !path.exists() {
        return Err(LayerError::MissingSource {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;

    let tiff_err = |source: tiff::TiffError| LayerError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;

    if (width as usize, height as usize) != (geometry.cols, geometry.rows) {
        return Err(LayerError::SourceDimensionMismatch {
            path: path.to_path_buf(),
            expected_cols: geometry.cols,
            expected_rows: geometry.rows,
            found_cols: width as usize,
            found_rows: height as usize,
        });
    }

    let image = decoder.read_image().map_err(tiff_err)?;
    let data: Vec<f64> = match image {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(LayerError::UnsupportedPixelType {
                path: path.to_path_buf(),
                found: "64-bit integer samples",
            });
        }
    };

    let n = data.len();
    let mut values =
        Array2::from_shape_vec((geometry.rows, geometry.cols), data).map_err(|_| {
            LayerError::ShapeMismatch {
                expected_rows: geometry.rows,
                expected_cols: geometry.cols,
                found_rows: n.div_ceil(geometry.cols.max(1)),
                found_cols: geometry.cols,
            }
        })?;

    for v in values.iter_mut() {
        if !v.is_finite() || nodata.is_some_and(|sentinel| is_nodata(*v, sentinel)) {
            *v = f64::NAN;
        }
    }

    Layer::new(geometry, values)
}

/// Sentinel comparison tolerant of the f32 -> f64 cast most products go
/// through (WorldClim's -3.4e38 does not survive the cast exactly).
fn is_nodata(v: f64, sentinel: f64) -> bool {
    if v == sentinel {
        return true;
    }
    sentinel != 0.0 && ((v - sentinel) / sentinel).abs() < 1e-6
}

/// Run one source through the crop / aggregate / reproject chain.
pub fn assemble_band<S: RasterSource>(
    source: &S,
    study: &GeoExtent,
    target: &GridGeometry,
) -> Result<Layer, LayerError> {
    let native = source.load()?;
    let cropped = crop(&native, study, source.name())?;
    let coarse = aggregate(&cropped, source.aggregate_factor(), source.name())?;
    project_nearest(&coarse, target, source.name())
}

/// Assemble all sources into an aligned stack on `target`, then blank out
/// cells outside the region mask when one is given.
pub fn assemble_stack<S: RasterSource>(
    sources: &[S],
    study: &GeoExtent,
    target: &GridGeometry,
    mask: Option<&Layer>,
) -> Result<LayerStack, LayerError> {
    let mut stack = LayerStack::new(*target);
    for source in sources {
        let layer = assemble_band(source, study, target)?;
        let valid = layer.valid_count();
        match layer.value_range() {
            Some((lo, hi)) => {
                info!(
                    "band {}: {} of {} cells valid, range [{lo:.3}, {hi:.3}]",
                    source.name(),
                    valid,
                    target.n_cells()
                );
            }
            None => {
                return Err(LayerError::NoOverlap {
                    band: source.name().to_string(),
                });
            }
        }
        stack.push(source.name(), layer)?;
    }
    if let Some(mask) = mask {
        stack.apply_mask(mask)?;
    }
    Ok(stack)
}
