use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tiff::encoder::{TiffEncoder, colortype};

use rangecast::artifact::ModelArtifact;
use rangecast::config::RunConfig;
use rangecast::pipeline::{report_from_artifact, run};

const OCCURRENCE_HEADER: &str = "gbifID\tdecimalLongitude\tdecimalLatitude\teventDate\tyear\tbasisOfRecord\tcoordinateUncertaintyInMeters\tidentificationVerificationStatus\tinformationWithheld";

/// A bounding box comfortably containing the study area, so the mask
/// keeps every analysis cell.
const BOUNDARY_GEOJSON: &str = r#"{"type":"Polygon","coordinates":[[[9.5,58.5],[14.5,58.5],[14.5,63.5],[9.5,63.5],[9.5,58.5]]]}"#;

const CONFIG_TEMPLATE: &str = r#"
[species]
genus = "Picea"
species = "abies"

[run]
cache_dir = "__CACHE__"
output_dir = "__OUTPUT__"
seed = 2024

[study]
min_lon = 10.0
min_lat = 59.5
max_lon = 13.0
max_lat = 62.5
cell = 30000.0
centre_lon = 11.5
centre_lat = 61.0
country = "NOR"
boundary_url = "https://files.example.org/NOR.geo.json"

[occurrence]
url = "https://files.example.org/picea_abies.tsv"

[climate]
bands = ["bio1", "bio12"]
model = "MPI-ESM1-2-HR"
scenario = "ssp370"
windows = ["2041-2060", "2061-2080"]
historical_url = "https://files.example.org/hist_{band}.tif"
future_url = "https://files.example.org/{model}_{scenario}_{window}_{band}.tif"

[climate.grid]
origin_x = 8.0
origin_y = 65.0
cell = 0.25
cols = 32
rows = 32

[elevation]
url = "https://files.example.org/elevation.tif"

[elevation.grid]
origin_x = 8.0
origin_y = 65.0
cell = 0.25
cols = 32
rows = 32

[soil]
sand_url = "https://files.example.org/sand.tif"
carbon_url = "https://files.example.org/carbon.tif"
aggregate = 2

[soil.grid]
origin_x = 8.0
origin_y = 65.0
cell = 0.125
cols = 64
rows = 64
"#;

fn write_f32_tiff(path: &Path, width: u32, height: u32, data: &[f32]) {
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    encoder
        .write_image::<colortype::Gray32Float>(width, height, data)
        .unwrap();
}

/// Raster built from a formula over (u, v): degrees east of 8E and south
/// of 65N at the native cell centres. The five bands use distinct
/// monomials, so no covariate subset is linearly dependent after
/// resampling.
fn synthetic_band(dims: usize, cell: f64, f: impl Fn(f64, f64) -> f64) -> Vec<f32> {
    let mut data = Vec::with_capacity(dims * dims);
    for row in 0..dims {
        for col in 0..dims {
            let u = cell * (col as f64 + 0.5);
            let v = cell * (row as f64 + 0.5);
            data.push(f(u, v) as f32);
        }
    }
    data
}

fn good_row(id: usize, lon: f64, lat: f64) -> String {
    let year = 1980 + (id % 20);
    let day = (id % 28) + 1;
    let basis = if id % 7 == 0 {
        "MACHINE_OBSERVATION"
    } else {
        "HUMAN_OBSERVATION"
    };
    let uncertainty = if id % 5 == 0 { "" } else { "250" };
    let verification = if id % 3 == 0 { "verified" } else { "" };
    format!("{id}\t{lon}\t{lat}\t{year}-06-{day:02}\t{year}\t{basis}\t{uncertainty}\t{verification}\t")
}

/// 24 clean records on a lattice wide enough that every record lands in
/// its own analysis cell, plus rows the loader or cleaner must reject.
fn occurrence_dump() -> String {
    let lons = [10.4, 11.0, 11.6, 12.2];
    let lats = [59.8, 60.28, 60.76, 61.24, 61.72, 62.2];

    let mut lines = vec![OCCURRENCE_HEADER.to_string()];
    let mut id = 0;
    for lat in lats {
        for lon in lons {
            id += 1;
            lines.push(good_row(id, lon, lat));
        }
    }

    // Wrong evidence class, outside the year window, withheld coordinates,
    // too uncertain, unparseable longitude, unverified, and a duplicate of
    // the first record.
    lines.push("100\t10.45\t59.85\t1995-06-01\t1995\tPRESERVED_SPECIMEN\t250\t\t".to_string());
    lines.push("101\t10.55\t59.95\t1950-06-01\t1950\tHUMAN_OBSERVATION\t250\t\t".to_string());
    lines.push(
        "102\t10.65\t60.05\t1995-06-02\t1995\tHUMAN_OBSERVATION\t250\t\tcoordinates generalized"
            .to_string(),
    );
    lines.push("103\t10.75\t60.15\t1995-06-03\t1995\tHUMAN_OBSERVATION\t50000\t\t".to_string());
    lines.push("104\tnot-a-number\t60.25\t1995-06-04\t1995\tHUMAN_OBSERVATION\t250\t\t".to_string());
    lines.push("105\t10.85\t60.35\t1995-06-05\t1995\tHUMAN_OBSERVATION\t250\tunverified\t".to_string());
    lines.push(good_row(1, lons[0], lats[0]));

    lines.join("\n")
}

struct Workspace {
    _root: TempDir,
    config: RunConfig,
    output: PathBuf,
}

/// A fully cached workspace: every remote input already sits in the cache
/// directory, so a run never touches the network.
fn build_workspace() -> Workspace {
    let root = TempDir::new().unwrap();
    let cache = root.path().join("cache");
    let output = root.path().join("output");
    fs::create_dir_all(&cache).unwrap();

    fs::write(cache.join("occurrences_picea_abies.tsv"), occurrence_dump()).unwrap();
    fs::write(cache.join("boundary_nor.geojson"), BOUNDARY_GEOJSON).unwrap();

    let bio1 = synthetic_band(32, 0.25, |_, v| 2.0 + 1.5 * v);
    let bio12 = synthetic_band(32, 0.25, |u, _| 100.0 * u);
    let elevation = synthetic_band(32, 0.25, |u, v| 150.0 + 8.0 * u * v);
    write_f32_tiff(&cache.join("climate_historical_bio1.tif"), 32, 32, &bio1);
    write_f32_tiff(&cache.join("climate_historical_bio12.tif"), 32, 32, &bio12);
    write_f32_tiff(&cache.join("elevation.tif"), 32, 32, &elevation);

    // Soil ships at double resolution and is mean-pooled onto the climate
    // grid by the provider.
    let sand = synthetic_band(64, 0.125, |u, v| 35.0 + 3.0 * u + 0.8 * v * v);
    let carbon = synthetic_band(64, 0.125, |u, v| 5.0 + 0.3 * u * u + 0.5 * v);
    write_f32_tiff(&cache.join("soil_sand.tif"), 64, 64, &sand);
    write_f32_tiff(&cache.join("soil_carbon.tif"), 64, 64, &carbon);

    // The first forecast window repeats the historical normals byte for
    // byte; the second warms bio1 by five degrees.
    for band in ["bio1", "bio12"] {
        fs::copy(
            cache.join(format!("climate_historical_{band}.tif")),
            cache.join(format!("climate_MPI-ESM1-2-HR_ssp370_2041-2060_{band}.tif")),
        )
        .unwrap();
    }
    let warmed: Vec<f32> = bio1.iter().map(|t| t + 5.0).collect();
    write_f32_tiff(
        &cache.join("climate_MPI-ESM1-2-HR_ssp370_2061-2080_bio1.tif"),
        32,
        32,
        &warmed,
    );
    fs::copy(
        cache.join("climate_historical_bio12.tif"),
        cache.join("climate_MPI-ESM1-2-HR_ssp370_2061-2080_bio12.tif"),
    )
    .unwrap();

    let toml_text = CONFIG_TEMPLATE
        .replace("__CACHE__", &cache.display().to_string())
        .replace("__OUTPUT__", &output.display().to_string());
    let config_path = root.path().join("rangecast.toml");
    fs::write(&config_path, toml_text).unwrap();
    let config = RunConfig::load(&config_path).unwrap();

    Workspace {
        _root: root,
        config,
        output,
    }
}

#[test]
fn full_run_produces_artifacts_and_a_stable_range() {
    let ws = build_workspace();
    let summary = run(&ws.config, false).unwrap();

    assert_eq!(summary.presences, 24);
    assert_eq!(summary.absences, 24);
    assert!(!summary.selected.is_empty());
    assert!(summary.auc >= 0.0 && summary.auc <= 1.0);
    assert!(!summary.threshold.is_nan());

    let expected = [
        "occurrences_clean.tsv",
        "model_features.tsv",
        "model_selection.tsv",
        "roc_curve.tsv",
        "selected_model.toml",
        "surface_historical.asc",
        "presence_historical.asc",
        "surface_2041-2060.asc",
        "presence_2041-2060.asc",
        "surface_2061-2080.asc",
        "presence_2061-2080.asc",
        "range_change_2041-2060.tsv",
        "range_change_2061-2080.tsv",
    ];
    for name in expected {
        assert!(ws.output.join(name).exists(), "missing artifact {name}");
    }

    // Header plus the 24 deduplicated clean records.
    let clean = fs::read_to_string(ws.output.join("occurrences_clean.tsv")).unwrap();
    assert_eq!(clean.lines().count(), 25);

    let artifact = ModelArtifact::load(&ws.output.join("selected_model.toml")).unwrap();
    assert_eq!(artifact.species, "Picea abies");
    assert_eq!(artifact.seed, 2024);
    assert_eq!(artifact.evaluation_fold, 5);
    assert_eq!(
        artifact.candidate_bands,
        ["bio1", "bio12", "elevation", "sand", "carbon"]
    );
    assert_eq!(artifact.covariates, summary.selected);
    assert_eq!(artifact.terms.len(), summary.selected.len() + 1);
    assert_eq!(artifact.terms[0].name, "intercept");
    assert_eq!(artifact.threshold, summary.threshold);
    assert_eq!(artifact.auc, summary.auc);

    // A window whose rasters repeat the historical normals byte for byte
    // cannot move the range.
    let (window, stable) = &summary.change[0];
    assert_eq!(window, "2041-2060");
    assert_eq!(stable.gained, 0);
    assert_eq!(stable.lost, 0);
    assert!(stable.historical_presence() >= 1);
    assert_eq!(stable.ratio(), 1.0);

    let (window, warmed) = &summary.change[1];
    assert_eq!(window, "2061-2080");
    assert!(!warmed.ratio().is_nan());
    assert_eq!(warmed.compared_cells(), stable.compared_cells());
}

#[test]
fn reruns_reproduce_artifacts_byte_for_byte() {
    let ws = build_workspace();
    let first = run(&ws.config, false).unwrap();

    let model = fs::read(ws.output.join("selected_model.toml")).unwrap();
    let surface = fs::read(ws.output.join("surface_historical.asc")).unwrap();
    let features = fs::read(ws.output.join("model_features.tsv")).unwrap();

    let second = run(&ws.config, true).unwrap();
    assert_eq!(second.presences, first.presences);
    assert_eq!(second.selected, first.selected);
    assert_eq!(second.threshold, first.threshold);
    assert_eq!(second.auc, first.auc);

    assert_eq!(fs::read(ws.output.join("selected_model.toml")).unwrap(), model);
    assert_eq!(
        fs::read(ws.output.join("surface_historical.asc")).unwrap(),
        surface
    );
    assert_eq!(
        fs::read(ws.output.join("model_features.tsv")).unwrap(),
        features
    );
}

#[test]
fn report_rebuilds_surfaces_from_the_saved_model() {
    let ws = build_workspace();
    let summary = run(&ws.config, false).unwrap();

    let surface_before = fs::read(ws.output.join("surface_2061-2080.asc")).unwrap();
    fs::remove_file(ws.output.join("surface_2061-2080.asc")).unwrap();

    let change =
        report_from_artifact(&ws.config, &ws.output.join("selected_model.toml"), true).unwrap();
    assert_eq!(change.len(), 2);
    for ((window, matrix), (run_window, run_matrix)) in change.iter().zip(summary.change.iter()) {
        assert_eq!(window, run_window);
        assert_eq!(matrix.gained, run_matrix.gained);
        assert_eq!(matrix.lost, run_matrix.lost);
        assert_eq!(matrix.both_present, run_matrix.both_present);
        assert_eq!(matrix.both_absent, run_matrix.both_absent);
    }
    assert_eq!(change[0].1.ratio(), 1.0);

    // The deleted surface is rebuilt identically from the saved model.
    assert_eq!(
        fs::read(ws.output.join("surface_2061-2080.asc")).unwrap(),
        surface_before
    );
}
