//! # Occurrence Dump Loading
//!
//! This module is the exclusive entry point for raw occurrence data. It
//! reads the tab-separated dump produced by the occurrence source, using a
//! strict, non-configurable column schema (the standard Darwin Core field
//! names), and turns each row into an `OccurrenceRecord` with every field
//! optional; deciding what is usable is the cleaner's job, not the
//! parser's.
//!
//! Rows that are structurally broken (short rows, numeric fields that hold
//! non-numeric text) are counted and skipped rather than aborting the load;
//! a malformed row in a multi-megabyte dump is expected, a missing column
//! is not.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::occurrence::OccurrenceError;

const COL_ID: &str = "gbifID";
const COL_LONGITUDE: &str = "decimalLongitude";
const COL_LATITUDE: &str = "decimalLatitude";
const COL_EVENT_DATE: &str = "eventDate";
const COL_YEAR: &str = "year";
const COL_BASIS: &str = "basisOfRecord";
const COL_UNCERTAINTY: &str = "coordinateUncertaintyInMeters";
const COL_VERIFICATION: &str = "identificationVerificationStatus";
const COL_WITHHELD: &str = "informationWithheld";

/// How an observation was made. Cleaning keeps only direct observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasisOfRecord {
    HumanObservation,
    MachineObservation,
    Other(String),
}

impl BasisOfRecord {
    /// Parse the source token, tolerating case and separator variants
    /// ("HUMAN_OBSERVATION", "HumanObservation"). Empty input is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let token: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match token.as_str() {
            "" => None,
            "HUMANOBSERVATION" => Some(Self::HumanObservation),
            "MACHINEOBSERVATION" => Some(Self::MachineObservation),
            _ => Some(Self::Other(raw.to_string())),
        }
    }
}

/// Identification verification status. Anything that is not an explicit
/// "verified" is kept verbatim for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    Verified,
    Other(String),
}

impl VerificationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.eq_ignore_ascii_case("verified") {
            Some(Self::Verified)
        } else {
            Some(Self::Other(trimmed.to_string()))
        }
    }
}

/// One raw occurrence row. Every field except the id may be absent.
#[derive(Debug, Clone)]
pub struct OccurrenceRecord {
    pub id: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Raw event date string; part of the deduplication identity.
    pub event_date: Option<String>,
    pub year: Option<i32>,
    pub basis: Option<BasisOfRecord>,
    /// Reported coordinate uncertainty in meters.
    pub uncertainty_m: Option<f64>,
    pub verification: Option<VerificationStatus>,
    /// True when the source flagged the record as partially withheld.
    pub withheld: bool,
}

/// The parsed dump plus how many rows could not be parsed.
#[derive(Debug)]
pub struct LoadedOccurrences {
    pub records: Vec<OccurrenceRecord>,
    pub skipped_rows: usize,
}

struct ColumnIndex {
    id: usize,
    longitude: usize,
    latitude: usize,
    event_date: usize,
    year: usize,
    basis: usize,
    uncertainty: usize,
    verification: usize,
    withheld: usize,
}

/// Load a tab-separated occurrence dump from disk.
pub fn read_occurrence_dump(path: &Path) -> Result<LoadedOccurrences, OccurrenceError> {
    if !path.exists() {
        return Err(OccurrenceError::MissingSource {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    read_occurrences(BufReader::new(file))
}

/// Load a dump from any reader; used directly by tests.
pub fn read_occurrences<R: std::io::Read>(reader: R) -> Result<LoadedOccurrences, OccurrenceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| OccurrenceError::ColumnNotFound(name.to_string()))
    };
    let columns = ColumnIndex {
        id: find(COL_ID)?,
        longitude: find(COL_LONGITUDE)?,
        latitude: find(COL_LATITUDE)?,
        event_date: find(COL_EVENT_DATE)?,
        year: find(COL_YEAR)?,
        basis: find(COL_BASIS)?,
        uncertainty: find(COL_UNCERTAINTY)?,
        verification: find(COL_VERIFICATION)?,
        withheld: find(COL_WITHHELD)?,
    };

    let mut records = Vec::new();
    let mut skipped_rows = 0usize;
    for row in csv_reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(_) => {
                skipped_rows += 1;
                continue;
            }
        };
        match parse_row(&row, &columns) {
            Some(record) => records.push(record),
            None => skipped_rows += 1,
        }
    }

    Ok(LoadedOccurrences {
        records,
        skipped_rows,
    })
}

/// None means the row is unusable (short row or unparseable numeric field).
fn parse_row(row: &csv::StringRecord, columns: &ColumnIndex) -> Option<OccurrenceRecord> {
    let field = |i: usize| row.get(i).map(str::trim);

    let id = field(columns.id)?.to_string();
    let longitude = parse_optional_f64(field(columns.longitude)?)?;
    let latitude = parse_optional_f64(field(columns.latitude)?)?;
    let year = parse_optional_i32(field(columns.year)?)?;
    let uncertainty_m = parse_optional_f64(field(columns.uncertainty)?)?;

    let event_date = non_empty(field(columns.event_date)?);
    let basis = BasisOfRecord::parse(field(columns.basis)?);
    let verification = VerificationStatus::parse(field(columns.verification)?);
    let withheld = !field(columns.withheld)?.is_empty();

    Some(OccurrenceRecord {
        id,
        longitude,
        latitude,
        event_date,
        year,
        basis,
        uncertainty_m,
        verification,
        withheld,
    })
}

/// Empty -> Some(None); parseable -> Some(Some(v)); garbage -> None.
fn parse_optional_f64(raw: &str) -> Option<Option<f64>> {
    if raw.is_empty() {
        Some(None)
    } else {
        raw.parse::<f64>().ok().map(Some)
    }
}

fn parse_optional_i32(raw: &str) -> Option<Option<i32>> {
    if raw.is_empty() {
        Some(None)
    } else {
        raw.parse::<i32>().ok().map(Some)
    }
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
