//! Output artifacts: tab-separated tables and ESRI ASCII grids.
//!
//! Every file is written through the same temp-file-and-rename path, so a
//! crash mid-write never leaves a half-finished artifact under the final
//! name. Existing outputs are never overwritten unless the caller forces
//! it.

use polars::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::evaluate::ThresholdReport;
use crate::layers::grid::Layer;
use crate::occurrence::clean::PresenceRecord;
use crate::project::ChangeMatrix;
use crate::select::{CandidateOutcome, Selection};

/// No-data sentinel for exported ASCII grids.
pub const ASCII_NODATA: &str = "-9999";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} already exists; pass --force to overwrite it", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to render the feature table: {0}")]
    Frame(#[from] PolarsError),
}

/// Refuse to clobber an existing artifact unless forced.
pub fn ensure_writable(path: &Path, force: bool) -> Result<(), ReportError> {
    if path.exists() && !force {
        return Err(ReportError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Write through a hidden temp file in the destination directory, then
/// rename over the final path. The temp name carries pid and a timestamp
/// so concurrent runs cannot collide.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<(), ReportError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let io_at = |source: io::Error| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let output_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let output_name = path.file_name().ok_or_else(|| {
        io_at(io::Error::new(
            io::ErrorKind::InvalidInput,
            "output path has no file name",
        ))
    })?;

    let pid = std::process::id();
    let ts_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut temp = None;
    for attempt in 0..32u32 {
        let candidate = output_dir.join(format!(
            ".{}.{}.{}.tmp",
            output_name.to_string_lossy(),
            pid,
            ts_nanos + attempt as u128
        ));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => {
                temp = Some((candidate, file));
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_at(e)),
        }
    }
    let (temp_path, temp_file) = temp.ok_or_else(|| {
        io_at(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "failed to allocate a unique temporary file",
        ))
    })?;

    let mut writer = BufWriter::new(temp_file);
    let write_result = (|| -> io::Result<()> {
        write(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(io_at(err));
    }

    fs::rename(&temp_path, path)
        .inspect_err(|_| {
            let _ = fs::remove_file(&temp_path);
        })
        .map_err(io_at)
}

/// Cleaned presence records as a tab-separated table.
pub fn write_clean_occurrences(
    path: &Path,
    records: &[PresenceRecord],
    force: bool,
) -> Result<(), ReportError> {
    ensure_writable(path, force)?;
    write_atomically(path, |writer| {
        writeln!(writer, "longitude\tlatitude\tevent_date\tyear")?;
        let mut lon_buffer = ryu::Buffer::new();
        let mut lat_buffer = ryu::Buffer::new();
        for r in records {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                lon_buffer.format(r.longitude),
                lat_buffer.format(r.latitude),
                r.event_date,
                r.year
            )?;
        }
        Ok(())
    })
}

/// The full candidate ranking: converged fits first in AIC order, with
/// the promoted and runner-up rows marked, failures at the bottom.
pub fn write_model_selection(
    path: &Path,
    selection: &Selection,
    force: bool,
) -> Result<(), ReportError> {
    ensure_writable(path, force)?;

    let best_aic = selection.selected.fit.aic;
    write_atomically(path, |writer| {
        writeln!(
            writer,
            "rank\tcovariates\tn_params\tdeviance\tlog_likelihood\taic\tdelta_aic\tstatus"
        )?;
        let mut buffer = ryu::Buffer::new();
        let mut delta_buffer = ryu::Buffer::new();
        for (position, record) in selection.ranking.iter().enumerate() {
            let covariates = record.subset.join("+");
            match &record.outcome {
                CandidateOutcome::Fitted {
                    deviance,
                    log_likelihood,
                    aic,
                } => {
                    let status = if record.subset == selection.selected.subset {
                        "selected"
                    } else if selection
                        .runner_up
                        .as_ref()
                        .is_some_and(|r| record.subset == r.subset)
                    {
                        "runner_up"
                    } else {
                        "converged"
                    };
                    write!(
                        writer,
                        "{}\t{}\t{}\t{}",
                        position + 1,
                        covariates,
                        record.n_params,
                        buffer.format(*deviance)
                    )?;
                    write!(writer, "\t{}", buffer.format(*log_likelihood))?;
                    write!(writer, "\t{}", buffer.format(*aic))?;
                    writeln!(
                        writer,
                        "\t{}\t{}",
                        delta_buffer.format(aic - best_aic),
                        status
                    )?;
                }
                CandidateOutcome::Failed(reason) => {
                    writeln!(
                        writer,
                        "{}\t{}\t{}\tNA\tNA\tNA\tNA\tfailed: {}",
                        position + 1,
                        covariates,
                        record.n_params,
                        reason
                    )?;
                }
            }
        }
        Ok(())
    })
}

/// ROC sweep with its summary statistics as `#`-prefixed metadata lines.
pub fn write_roc_curve(
    path: &Path,
    report: &ThresholdReport,
    force: bool,
) -> Result<(), ReportError> {
    ensure_writable(path, force)?;
    write_atomically(path, |writer| {
        let mut buffer = ryu::Buffer::new();
        writeln!(writer, "#AUC\t{}", buffer.format(report.auc))?;
        writeln!(writer, "#THRESHOLD\t{}", buffer.format(report.threshold))?;
        writeln!(writer, "#SENSITIVITY\t{}", buffer.format(report.sensitivity))?;
        writeln!(writer, "#SPECIFICITY\t{}", buffer.format(report.specificity))?;
        writeln!(writer, "#N_PRESENCE\t{}", report.n_presence)?;
        writeln!(writer, "#N_ABSENCE\t{}", report.n_absence)?;
        writeln!(writer, "threshold\tsensitivity\tspecificity")?;
        let mut sens_buffer = ryu::Buffer::new();
        let mut spec_buffer = ryu::Buffer::new();
        for point in &report.points {
            writeln!(
                writer,
                "{}\t{}\t{}",
                buffer.format(point.threshold),
                sens_buffer.format(point.sensitivity),
                spec_buffer.format(point.specificity)
            )?;
        }
        Ok(())
    })
}

/// One period's range-change cross-tabulation.
pub fn write_change_summary(
    path: &Path,
    period: &str,
    matrix: &ChangeMatrix,
    force: bool,
) -> Result<(), ReportError> {
    ensure_writable(path, force)?;
    write_atomically(path, |writer| {
        writeln!(
            writer,
            "period\tboth_present\tgained\tlost\tboth_absent\thistorical_presence\tfuture_presence\tratio"
        )?;
        let mut buffer = ryu::Buffer::new();
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            period,
            matrix.both_present,
            matrix.gained,
            matrix.lost,
            matrix.both_absent,
            matrix.historical_presence(),
            matrix.future_presence(),
            buffer.format(matrix.ratio())
        )?;
        Ok(())
    })
}

/// A layer as an ESRI ASCII grid (row-major from the north-west corner).
pub fn write_ascii_grid(path: &Path, layer: &Layer, force: bool) -> Result<(), ReportError> {
    ensure_writable(path, force)?;
    let geometry = *layer.geometry();
    let (min_x, min_y, _, _) = geometry.bounds();
    write_atomically(path, |writer| {
        let mut buffer = ryu::Buffer::new();
        writeln!(writer, "ncols {}", geometry.cols)?;
        writeln!(writer, "nrows {}", geometry.rows)?;
        writeln!(writer, "xllcorner {}", buffer.format(min_x))?;
        writeln!(writer, "yllcorner {}", buffer.format(min_y))?;
        writeln!(writer, "cellsize {}", buffer.format(geometry.cell))?;
        writeln!(writer, "NODATA_value {ASCII_NODATA}")?;
        for row in layer.values().rows() {
            let mut first = true;
            for &v in row {
                if !first {
                    write!(writer, " ")?;
                }
                first = false;
                if v.is_finite() {
                    write!(writer, "{}", buffer.format(v))?;
                } else {
                    write!(writer, "{ASCII_NODATA}")?;
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    })
}

/// A data frame as a tab-separated table, through the same atomic path.
pub fn write_frame_tsv(
    path: &Path,
    frame: &mut DataFrame,
    force: bool,
) -> Result<(), ReportError> {
    ensure_writable(path, force)?;
    let mut rendered = Vec::new();
    CsvWriter::new(&mut rendered)
        .with_separator(b'\t')
        .finish(frame)?;
    write_atomically(path, move |writer| writer.write_all(&rendered))
}
