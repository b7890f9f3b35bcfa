//! Quality filtering and deduplication of raw occurrence records.
//!
//! A record survives cleaning iff it is a direct observation (human or
//! machine), has finite coordinates, is verified or carries no verification
//! verdict, withholds no information, reports uncertainty within the bound
//! (or none), and falls inside the historical year window. Duplicates by
//! (event date, longitude, latitude) keep the first record in input order.

use ahash::AHashSet;

use crate::occurrence::records::{BasisOfRecord, OccurrenceRecord, VerificationStatus};

/// Cleaning bounds. Defaults are the standard run settings.
#[derive(Debug, Clone, Copy)]
pub struct CleanRules {
    pub max_uncertainty_m: f64,
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for CleanRules {
    fn default() -> Self {
        Self {
            max_uncertainty_m: 1000.0,
            min_year: 1970,
            max_year: 2000,
        }
    }
}

/// A cleaned record, reduced to what the rest of the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub longitude: f64,
    pub latitude: f64,
    /// Raw event date string, empty when the source row had none.
    pub event_date: String,
    pub year: i32,
}

/// The cleaning filter predicate.
pub fn keep(record: &OccurrenceRecord, rules: &CleanRules) -> bool {
    let basis_ok = matches!(
        record.basis,
        Some(BasisOfRecord::HumanObservation | BasisOfRecord::MachineObservation)
    );
    let coords_ok = match (record.longitude, record.latitude) {
        (Some(lon), Some(lat)) => lon.is_finite() && lat.is_finite(),
        _ => false,
    };
    let verification_ok = matches!(
        record.verification,
        None | Some(VerificationStatus::Verified)
    );
    let uncertainty_ok = record
        .uncertainty_m
        .is_none_or(|u| u <= rules.max_uncertainty_m);
    let year_ok = record
        .year
        .is_some_and(|y| y >= rules.min_year && y <= rules.max_year);

    basis_ok && coords_ok && verification_ok && !record.withheld && uncertainty_ok && year_ok
}

/// Filter then deduplicate, preserving input order.
pub fn clean(records: &[OccurrenceRecord], rules: &CleanRules) -> Vec<PresenceRecord> {
    let mut seen: AHashSet<(u64, u64, String)> = AHashSet::new();
    let mut kept = Vec::new();

    for record in records.iter().filter(|r| keep(r, rules)) {
        let (Some(lon), Some(lat), Some(year)) = (record.longitude, record.latitude, record.year)
        else {
            continue;
        };
        let date = record.event_date.clone().unwrap_or_default();
        if seen.insert((lon.to_bits(), lat.to_bits(), date.clone())) {
            kept.push(PresenceRecord {
                longitude: lon,
                latitude: lat,
                event_date: date,
                year,
            });
        }
    }
    kept
}
