//! Environmental layer handling: grid geometry, projection, resampling,
//! GeoTIFF sources, and the aligned multi-band stack the model consumes.

pub mod boundary;
pub mod grid;
pub mod proj;
pub mod provider;
pub mod resample;
pub mod stack;

use std::path::PathBuf;
use thiserror::Error;

use crate::layers::grid::{GridCrs, GridGeometry};

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("band '{band}' is not on the shared grid: expected {expected}, found {found}")]
    GridMismatch {
        band: String,
        expected: Box<GridGeometry>,
        found: Box<GridGeometry>,
    },

    #[error(
        "array shape {found_rows}x{found_cols} does not match grid {expected_rows}x{expected_cols}"
    )]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("band '{0}' is already present in the stack")]
    DuplicateBand(String),

    #[error("band '{0}' is not present in the stack")]
    UnknownBand(String),

    #[error("band '{band}' has no cells inside the requested extent")]
    NoOverlap { band: String },

    #[error("cannot reproject band '{band}' from {from} to {to}")]
    Reproject {
        band: String,
        from: GridCrs,
        to: GridCrs,
    },

    #[error("failed to decode {}: {source}", path.display())]
    TiffDecode {
        path: PathBuf,
        source: tiff::TiffError,
    },

    #[error("unsupported pixel type ({found}) in {}", path.display())]
    UnsupportedPixelType { path: PathBuf, found: &'static str },

    #[error(
        "{} is {found_cols}x{found_rows} but the declared source grid is {expected_cols}x{expected_rows}",
        path.display()
    )]
    SourceDimensionMismatch {
        path: PathBuf,
        expected_cols: usize,
        expected_rows: usize,
        found_cols: usize,
        found_rows: usize,
    },

    #[error("aggregation factor must be at least 1, got {0}")]
    BadAggregationFactor(usize),

    #[error("missing input file {} (run the fetch step first)", path.display())]
    MissingSource { path: PathBuf },

    #[error("invalid boundary file {}: {detail}", path.display())]
    Boundary { path: PathBuf, detail: String },
}
