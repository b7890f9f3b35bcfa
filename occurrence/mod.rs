//! Species occurrence ingestion: the raw dump schema, quality filtering,
//! and deduplication into presence records.

pub mod clean;
pub mod records;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OccurrenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse occurrence dump: {0}")]
    Csv(#[from] csv::Error),

    #[error("the required column '{0}' was not found in the occurrence dump")]
    ColumnNotFound(String),

    #[error("missing occurrence dump {} (run the fetch step first)", path.display())]
    MissingSource { path: PathBuf },

    #[error("no occurrence records survived cleaning")]
    NoUsableRecords,
}
