//! End-to-end run orchestration: cache fetch, occurrence cleaning, stack
//! assembly, sampling, model selection, held-out evaluation, projection,
//! and artifact writing, in that order.
//!
//! Every failure is tagged with the stage it happened in, so a run that
//! dies half-way says which phase to look at.

use log::info;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

use crate::artifact::{ArtifactError, ModelArtifact};
use crate::config::{ELEVATION_BAND, Period, RunConfig};
use crate::evaluate::{self, EvalError, ThresholdReport};
use crate::features::{FeatureError, FeatureTable, FoldFilter, extract};
use crate::fetch::{self, FetchError, FetchSummary};
use crate::folds::{FoldError, assign_folds};
use crate::glm::sigmoid;
use crate::layers::LayerError;
use crate::layers::boundary::BoundaryPolygon;
use crate::layers::grid::{GridGeometry, Layer};
use crate::layers::provider::assemble_stack;
use crate::layers::stack::LayerStack;
use crate::occurrence::OccurrenceError;
use crate::occurrence::clean::{PresenceRecord, clean};
use crate::occurrence::records::read_occurrence_dump;
use crate::project::{ChangeMatrix, ProjectionError, binarize, change_matrix, probability_surface};
use crate::report::{self, ReportError};
use crate::sample::{SampleError, place_presences, sample_absences};
use crate::select::{FittedCandidate, SelectError, Selection, select_model};

/// The pipeline phase an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Occurrences,
    Layers,
    Sampling,
    Features,
    Selection,
    Evaluation,
    Projection,
    Artifacts,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Occurrences => "occurrences",
            Stage::Layers => "layers",
            Stage::Sampling => "sampling",
            Stage::Features => "features",
            Stage::Selection => "selection",
            Stage::Evaluation => "evaluation",
            Stage::Projection => "projection",
            Stage::Artifacts => "artifacts",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Occurrence(#[from] OccurrenceError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Fold(#[from] FoldError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

fn at<T, E: Into<StageError>>(stage: Stage, result: Result<T, E>) -> Result<T, PipelineError> {
    result.map_err(|e| PipelineError {
        stage,
        source: e.into(),
    })
}

/// What a completed run produced, for the caller to print.
#[derive(Debug)]
pub struct RunSummary {
    pub presences: usize,
    pub absences: usize,
    pub selected: Vec<String>,
    pub auc: f64,
    pub threshold: f64,
    /// Per forecast window, in configuration order.
    pub change: Vec<(String, ChangeMatrix)>,
}

/// Download whatever is missing from the cache.
pub fn fetch(config: &RunConfig) -> Result<FetchSummary, PipelineError> {
    at(Stage::Fetch, fetch::fetch_missing(&config.fetch_jobs()))
}

/// The full pipeline, from cache to artifacts.
pub fn run(config: &RunConfig, force: bool) -> Result<RunSummary, PipelineError> {
    let started = Instant::now();
    fetch(config)?;

    // Occurrences.
    let loaded = at(
        Stage::Occurrences,
        read_occurrence_dump(&config.occurrence_path()),
    )?;
    let presences = clean(&loaded.records, &config.occurrence.clean_rules());
    eprintln!(
        "> {} raw occurrence rows ({} unparseable), {} presences after cleaning.",
        loaded.records.len(),
        loaded.skipped_rows,
        presences.len()
    );
    if presences.is_empty() {
        return at(Stage::Occurrences, Err(OccurrenceError::NoUsableRecords));
    }

    // Layers: boundary mask plus the historical stack.
    let target = config.study.target_grid();
    info!("analysis grid: {target}");
    let boundary = at(
        Stage::Layers,
        BoundaryPolygon::from_geojson_file(&config.boundary_path()),
    )?;
    let mask = at(Stage::Layers, boundary.rasterize(&target))?;
    eprintln!("> Assembling historical covariate stack...");
    let historical = at(
        Stage::Layers,
        assemble(config, &Period::Historical, &target, &mask),
    )?;

    // Sampling: presences onto the grid, pseudo-absences from land cells.
    let seed = config.run.seed;
    let placed = at(Stage::Sampling, place_presences(&target, &presences))?;
    let n_presence = placed.cells.len();
    let absences = at(
        Stage::Sampling,
        sample_absences(&historical, ELEVATION_BAND, &placed.cells, n_presence, seed),
    )?;
    eprintln!(
        "> {} presences on the grid ({} outside), {} pseudo-absences drawn.",
        n_presence, placed.dropped_outside, n_presence
    );
    let presence_folds = at(
        Stage::Sampling,
        assign_folds(n_presence, config.run.folds as usize, seed.wrapping_add(1)),
    )?;
    let absence_folds = at(
        Stage::Sampling,
        assign_folds(absences.len(), config.run.folds as usize, seed.wrapping_add(2)),
    )?;

    // Features and model selection.
    let table = at(
        Stage::Features,
        extract(
            &historical,
            &placed.cells,
            &presence_folds,
            &absences,
            &absence_folds,
        ),
    )?;
    let selection = at(
        Stage::Selection,
        select_model(&table, config.run.evaluation_fold),
    )?;

    // Held-out evaluation of the selected model.
    let evaluation = at(
        Stage::Evaluation,
        evaluate_held_out(&table, &selection.selected, config.run.evaluation_fold),
    )?;
    eprintln!(
        "> Held-out fold {}: AUC {:.3}, threshold {:.3} (sens {:.3}, spec {:.3}).",
        config.run.evaluation_fold,
        evaluation.auc,
        evaluation.threshold,
        evaluation.sensitivity,
        evaluation.specificity
    );

    // Projection: one probability and one presence surface per period.
    let subset = &selection.selected.subset;
    let coefficients = selection.selected.fit.coefficients.to_vec();
    let historical_surface = at(
        Stage::Projection,
        probability_surface(&historical, subset, &coefficients),
    )?;
    let historical_presence = binarize(&historical_surface, evaluation.threshold);

    let mut projections: Vec<(String, Layer, Layer)> = Vec::new();
    let mut change: Vec<(String, ChangeMatrix)> = Vec::new();
    for window in &config.climate.windows {
        let period = Period::Future(window.clone());
        eprintln!("> Assembling {} covariate stack...", period.tag());
        let future = at(Stage::Layers, assemble(config, &period, &target, &mask))?;
        let surface = at(
            Stage::Projection,
            probability_surface(&future, subset, &coefficients),
        )?;
        let presence = binarize(&surface, evaluation.threshold);
        let matrix = at(
            Stage::Projection,
            change_matrix(&historical_presence, &presence),
        )?;
        change.push((window.clone(), matrix));
        projections.push((period.tag().to_string(), surface, presence));
    }
    projections.insert(
        0,
        (
            Period::Historical.tag().to_string(),
            historical_surface,
            historical_presence,
        ),
    );

    // Artifacts.
    let out = &config.run.output_dir;
    at(
        Stage::Artifacts,
        fs::create_dir_all(out).map_err(|source| ReportError::Io {
            path: out.clone(),
            source,
        }),
    )?;
    eprintln!("> Writing artifacts to {}.", out.display());
    write_artifacts(
        config,
        &presences,
        &table,
        &selection,
        &evaluation,
        &projections,
        &change,
        force,
    )?;

    eprintln!("> Run complete in {:.1}s.", started.elapsed().as_secs_f64());
    Ok(RunSummary {
        presences: n_presence,
        absences: absences.len(),
        selected: selection.selected.subset.clone(),
        auc: evaluation.auc,
        threshold: evaluation.threshold,
        change,
    })
}

/// Re-render surfaces and change summaries from a saved model, without
/// refitting anything.
pub fn report_from_artifact(
    config: &RunConfig,
    model_path: &Path,
    force: bool,
) -> Result<Vec<(String, ChangeMatrix)>, PipelineError> {
    let artifact = at(Stage::Artifacts, ModelArtifact::load(model_path))?;
    eprintln!(
        "> Loaded model for {} (AIC {:.3}, threshold {:.3}).",
        artifact.species, artifact.aic, artifact.threshold
    );

    let target = config.study.target_grid();
    let boundary = at(
        Stage::Layers,
        BoundaryPolygon::from_geojson_file(&config.boundary_path()),
    )?;
    let mask = at(Stage::Layers, boundary.rasterize(&target))?;

    let coefficients = artifact.coefficients();
    let historical_stack = at(
        Stage::Layers,
        assemble(config, &Period::Historical, &target, &mask),
    )?;
    let historical_surface = at(
        Stage::Projection,
        probability_surface(&historical_stack, &artifact.covariates, &coefficients),
    )?;
    let historical_presence = binarize(&historical_surface, artifact.threshold);

    let out = &config.run.output_dir;
    at(
        Stage::Artifacts,
        fs::create_dir_all(out).map_err(|source| ReportError::Io {
            path: out.clone(),
            source,
        }),
    )?;
    write_surfaces(
        out,
        Period::Historical.tag(),
        &historical_surface,
        &historical_presence,
        force,
    )?;

    let mut change = Vec::new();
    for window in &config.climate.windows {
        let period = Period::Future(window.clone());
        let future = at(Stage::Layers, assemble(config, &period, &target, &mask))?;
        let surface = at(
            Stage::Projection,
            probability_surface(&future, &artifact.covariates, &coefficients),
        )?;
        let presence = binarize(&surface, artifact.threshold);
        let matrix = at(
            Stage::Projection,
            change_matrix(&historical_presence, &presence),
        )?;
        write_surfaces(out, period.tag(), &surface, &presence, force)?;
        at(
            Stage::Artifacts,
            report::write_change_summary(
                &out.join(format!("range_change_{window}.tsv")),
                window,
                &matrix,
                force,
            ),
        )?;
        change.push((window.clone(), matrix));
    }
    Ok(change)
}

fn assemble(
    config: &RunConfig,
    period: &Period,
    target: &GridGeometry,
    mask: &Layer,
) -> Result<LayerStack, LayerError> {
    assemble_stack(
        &config.stack_sources(period),
        &config.study.extent(),
        target,
        Some(mask),
    )
}

/// Score the held-out fold with the selected model and sweep thresholds.
fn evaluate_held_out(
    table: &FeatureTable,
    selected: &FittedCandidate,
    evaluation_fold: u32,
) -> Result<ThresholdReport, EvalError> {
    let design = table.design(&selected.subset_indices, FoldFilter::Only(evaluation_fold));
    let eta = design.matrix.dot(&selected.fit.coefficients);

    let mut presence_scores = Vec::new();
    let mut absence_scores = Vec::new();
    for (&e, &label) in eta.iter().zip(design.response.iter()) {
        let score = sigmoid(e);
        if label == 1.0 {
            presence_scores.push(score);
        } else {
            absence_scores.push(score);
        }
    }
    evaluate::evaluate_scores(&presence_scores, &absence_scores)
}

#[allow(clippy::too_many_arguments)]
fn write_artifacts(
    config: &RunConfig,
    presences: &[PresenceRecord],
    table: &FeatureTable,
    selection: &Selection,
    evaluation: &ThresholdReport,
    projections: &[(String, Layer, Layer)],
    change: &[(String, ChangeMatrix)],
    force: bool,
) -> Result<(), PipelineError> {
    let out = &config.run.output_dir;
    let write = |r: Result<(), ReportError>| at(Stage::Artifacts, r);

    write(report::write_clean_occurrences(
        &out.join("occurrences_clean.tsv"),
        presences,
        force,
    ))?;

    let mut frame = at(Stage::Artifacts, table.frame())?;
    write(report::write_frame_tsv(
        &out.join("model_features.tsv"),
        &mut frame,
        force,
    ))?;

    write(report::write_model_selection(
        &out.join("model_selection.tsv"),
        selection,
        force,
    ))?;
    write(report::write_roc_curve(
        &out.join("roc_curve.tsv"),
        evaluation,
        force,
    ))?;

    let artifact = ModelArtifact::from_run(
        &config.species.binomial(),
        config.run.seed,
        config.run.evaluation_fold,
        &config.band_order(),
        &selection.selected,
        selection.runner_up.as_ref(),
        evaluation,
    );
    let text = at(Stage::Artifacts, artifact.to_toml())?;
    let model_path = out.join("selected_model.toml");
    write(report::ensure_writable(&model_path, force))?;
    write(report::write_atomically(&model_path, |w| {
        w.write_all(text.as_bytes())
    }))?;

    for (tag, surface, presence) in projections {
        write_surfaces(out, tag, surface, presence, force)?;
    }
    for (window, matrix) in change {
        write(report::write_change_summary(
            &out.join(format!("range_change_{window}.tsv")),
            window,
            matrix,
            force,
        ))?;
    }
    Ok(())
}

fn write_surfaces(
    out: &Path,
    tag: &str,
    surface: &Layer,
    presence: &Layer,
    force: bool,
) -> Result<(), PipelineError> {
    let write = |r: Result<(), ReportError>| at(Stage::Artifacts, r);
    write(report::write_ascii_grid(
        &out.join(format!("surface_{tag}.asc")),
        surface,
        force,
    ))?;
    write(report::write_ascii_grid(
        &out.join(format!("presence_{tag}.asc")),
        presence,
        force,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_read_as_phases() {
        assert_eq!(Stage::Fetch.to_string(), "fetch");
        assert_eq!(Stage::Selection.to_string(), "selection");
        assert_eq!(Stage::Artifacts.to_string(), "artifacts");
    }

    #[test]
    fn errors_carry_their_stage() {
        let err = at::<(), _>(
            Stage::Occurrences,
            Err(OccurrenceError::NoUsableRecords),
        )
        .unwrap_err();
        assert_eq!(err.stage, Stage::Occurrences);
        assert_eq!(
            err.to_string(),
            "occurrences stage failed: no occurrence records survived cleaning"
        );
    }
}
