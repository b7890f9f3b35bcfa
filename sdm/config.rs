//! The run configuration: one explicit TOML document driving fetch,
//! modelling, and projection.
//!
//! Georeferencing of every remote product is declared here rather than
//! trusted from file metadata, and every derived name (cache files, band
//! order, analysis grid) is a pure function of this struct, so two runs
//! from the same file see the same world.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fetch::FetchJob;
use crate::layers::grid::{GeoExtent, GridCrs, GridGeometry};
use crate::layers::proj;
use crate::layers::provider::GeoTiffSource;
use crate::occurrence::clean::CleanRules;

/// Band name of the elevation covariate (also the land/sea test for
/// pseudo-absence sampling).
pub const ELEVATION_BAND: &str = "elevation";
/// Band name of the soil sand-fraction covariate.
pub const SAND_BAND: &str = "sand";
/// Band name of the soil organic-carbon-density covariate.
pub const CARBON_BAND: &str = "carbon";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub species: SpeciesSection,
    pub run: RunSection,
    pub study: StudySection,
    pub occurrence: OccurrenceSection,
    pub climate: ClimateSection,
    pub elevation: ElevationSection,
    pub soil: SoilSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesSection {
    pub genus: String,
    pub species: String,
}

impl SpeciesSection {
    pub fn binomial(&self) -> String {
        format!("{} {}", self.genus, self.species)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub seed: u64,
    #[serde(default = "default_folds")]
    pub folds: u32,
    #[serde(default = "default_evaluation_fold")]
    pub evaluation_fold: u32,
}

fn default_folds() -> u32 {
    5
}

fn default_evaluation_fold() -> u32 {
    5
}

/// The study box in degrees and the equal-area grid derived from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudySection {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    /// Analysis cell edge in metres.
    pub cell: f64,
    /// Projection centre.
    pub centre_lon: f64,
    pub centre_lat: f64,
    /// ISO-3 code of the country the stack is clipped to.
    pub country: String,
    pub boundary_url: String,
}

impl StudySection {
    pub fn extent(&self) -> GeoExtent {
        GeoExtent {
            min_lon: self.min_lon,
            min_lat: self.min_lat,
            max_lon: self.max_lon,
            max_lat: self.max_lat,
        }
    }

    pub fn target_grid(&self) -> GridGeometry {
        proj::target_grid(&self.extent(), self.cell, self.centre_lon, self.centre_lat)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OccurrenceSection {
    pub url: String,
    #[serde(default = "default_max_uncertainty_m")]
    pub max_uncertainty_m: f64,
    #[serde(default = "default_min_year")]
    pub min_year: i32,
    #[serde(default = "default_max_year")]
    pub max_year: i32,
}

fn default_max_uncertainty_m() -> f64 {
    1000.0
}

fn default_min_year() -> i32 {
    1970
}

fn default_max_year() -> i32 {
    2000
}

impl OccurrenceSection {
    pub fn clean_rules(&self) -> CleanRules {
        CleanRules {
            max_uncertainty_m: self.max_uncertainty_m,
            min_year: self.min_year,
            max_year: self.max_year,
        }
    }
}

/// Declared georeferencing of one remote raster product.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell: f64,
    pub cols: usize,
    pub rows: usize,
    pub nodata: Option<f64>,
}

impl NativeGrid {
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(
            self.origin_x,
            self.origin_y,
            self.cell,
            self.cols,
            self.rows,
            GridCrs::LonLat,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateSection {
    /// Bioclimatic bands offered to the model, e.g. "bio1".
    pub bands: Vec<String>,
    pub model: String,
    pub scenario: String,
    /// Forecast windows, e.g. "2041-2060".
    pub windows: Vec<String>,
    /// Template with `{band}`.
    pub historical_url: String,
    /// Template with `{band}`, `{model}`, `{scenario}`, `{window}`.
    pub future_url: String,
    pub grid: NativeGrid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElevationSection {
    pub url: String,
    pub grid: NativeGrid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoilSection {
    pub sand_url: String,
    pub carbon_url: String,
    pub grid: NativeGrid,
    /// Mean-pool block size bringing the soil resolution down to the
    /// climate resolution.
    #[serde(default = "default_soil_aggregate")]
    pub aggregate: usize,
}

fn default_soil_aggregate() -> usize {
    1
}

/// One projection period: the historical normal or a forecast window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Historical,
    Future(String),
}

impl Period {
    pub fn tag(&self) -> &str {
        match self {
            Period::Historical => "historical",
            Period::Future(window) => window,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.run.folds < 2 {
            return invalid(format!("run.folds must be at least 2, got {}", self.run.folds));
        }
        if self.run.evaluation_fold < 1 || self.run.evaluation_fold > self.run.folds {
            return invalid(format!(
                "run.evaluation_fold must lie in 1..={}, got {}",
                self.run.folds, self.run.evaluation_fold
            ));
        }
        if self.study.min_lon >= self.study.max_lon || self.study.min_lat >= self.study.max_lat {
            return invalid(format!(
                "study box is empty: {}",
                self.study.extent()
            ));
        }
        if !(self.study.cell > 0.0) {
            return invalid(format!("study.cell must be positive, got {}", self.study.cell));
        }
        if self.climate.bands.is_empty() {
            return invalid("climate.bands must name at least one band".to_string());
        }
        for (i, band) in self.climate.bands.iter().enumerate() {
            if self.climate.bands[..i].contains(band) {
                return invalid(format!("climate band '{band}' is listed twice"));
            }
            if [ELEVATION_BAND, SAND_BAND, CARBON_BAND].contains(&band.as_str()) {
                return invalid(format!(
                    "climate band '{band}' collides with a fixed covariate name"
                ));
            }
        }
        if self.climate.windows.is_empty() {
            return invalid("climate.windows must name at least one forecast window".to_string());
        }
        for (i, window) in self.climate.windows.iter().enumerate() {
            if self.climate.windows[..i].contains(window) {
                return invalid(format!("forecast window '{window}' is listed twice"));
            }
        }
        if self.soil.aggregate < 1 {
            return invalid("soil.aggregate must be at least 1".to_string());
        }
        for (name, grid) in [
            ("climate", &self.climate.grid),
            ("elevation", &self.elevation.grid),
            ("soil", &self.soil.grid),
        ] {
            if grid.cols == 0 || grid.rows == 0 || !(grid.cell > 0.0) {
                return invalid(format!("{name}.grid is degenerate"));
            }
        }
        Ok(())
    }

    /// Covariates in stack order: climate bands, then elevation, then the
    /// two soil bands. This order fixes design-matrix columns everywhere.
    pub fn band_order(&self) -> Vec<String> {
        let mut bands = self.climate.bands.clone();
        bands.push(ELEVATION_BAND.to_string());
        bands.push(SAND_BAND.to_string());
        bands.push(CARBON_BAND.to_string());
        bands
    }

    pub fn periods(&self) -> Vec<Period> {
        let mut periods = vec![Period::Historical];
        periods.extend(
            self.climate
                .windows
                .iter()
                .map(|w| Period::Future(w.clone())),
        );
        periods
    }

    pub fn occurrence_path(&self) -> PathBuf {
        self.run.cache_dir.join(format!(
            "occurrences_{}_{}.tsv",
            self.species.genus.to_lowercase(),
            self.species.species.to_lowercase()
        ))
    }

    pub fn boundary_path(&self) -> PathBuf {
        self.run
            .cache_dir
            .join(format!("boundary_{}.geojson", self.study.country.to_lowercase()))
    }

    fn climate_path(&self, period: &Period, band: &str) -> PathBuf {
        let name = match period {
            Period::Historical => format!("climate_historical_{band}.tif"),
            Period::Future(window) => format!(
                "climate_{}_{}_{}_{band}.tif",
                self.climate.model, self.climate.scenario, window
            ),
        };
        self.run.cache_dir.join(name)
    }

    fn elevation_path(&self) -> PathBuf {
        self.run.cache_dir.join("elevation.tif")
    }

    fn sand_path(&self) -> PathBuf {
        self.run.cache_dir.join("soil_sand.tif")
    }

    fn carbon_path(&self) -> PathBuf {
        self.run.cache_dir.join("soil_carbon.tif")
    }

    /// Raster sources for one period's stack, in `band_order`. Elevation
    /// and soil are treated as static across periods.
    pub fn stack_sources(&self, period: &Period) -> Vec<GeoTiffSource> {
        let mut sources = Vec::with_capacity(self.climate.bands.len() + 3);
        for band in &self.climate.bands {
            sources.push(GeoTiffSource {
                name: band.clone(),
                path: self.climate_path(period, band),
                geometry: self.climate.grid.geometry(),
                nodata: self.climate.grid.nodata,
                aggregate: 1,
            });
        }
        sources.push(GeoTiffSource {
            name: ELEVATION_BAND.to_string(),
            path: self.elevation_path(),
            geometry: self.elevation.grid.geometry(),
            nodata: self.elevation.grid.nodata,
            aggregate: 1,
        });
        sources.push(GeoTiffSource {
            name: SAND_BAND.to_string(),
            path: self.sand_path(),
            geometry: self.soil.grid.geometry(),
            nodata: self.soil.grid.nodata,
            aggregate: self.soil.aggregate,
        });
        sources.push(GeoTiffSource {
            name: CARBON_BAND.to_string(),
            path: self.carbon_path(),
            geometry: self.soil.grid.geometry(),
            nodata: self.soil.grid.nodata,
            aggregate: self.soil.aggregate,
        });
        sources
    }

    /// Every remote input mapped to its cache file.
    pub fn fetch_jobs(&self) -> Vec<FetchJob> {
        let mut jobs = vec![
            FetchJob::new(self.occurrence.url.clone(), self.occurrence_path()),
            FetchJob::new(self.study.boundary_url.clone(), self.boundary_path()),
            FetchJob::new(self.elevation.url.clone(), self.elevation_path()),
            FetchJob::new(self.soil.sand_url.clone(), self.sand_path()),
            FetchJob::new(self.soil.carbon_url.clone(), self.carbon_path()),
        ];
        for band in &self.climate.bands {
            let url = fill(&self.climate.historical_url, &[("band", band)]);
            jobs.push(FetchJob::new(url, self.climate_path(&Period::Historical, band)));
        }
        for window in &self.climate.windows {
            let period = Period::Future(window.clone());
            for band in &self.climate.bands {
                let url = fill(
                    &self.climate.future_url,
                    &[
                        ("band", band),
                        ("model", &self.climate.model),
                        ("scenario", &self.climate.scenario),
                        ("window", window),
                    ],
                );
                jobs.push(FetchJob::new(url, self.climate_path(&period, band)));
            }
        }
        jobs
    }
}

/// Substitute `{key}` placeholders in a URL template.
fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
