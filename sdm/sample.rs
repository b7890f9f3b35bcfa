//! Placing presences on the analysis grid and drawing pseudo-absences.
//!
//! Absences here are background points, not observed zeroes: the sampler
//! draws uniformly without replacement from land cells (elevation above sea
//! level) that hold no presence. One record per cell is not enforced for
//! presences; several observations may map to the same cell and each keeps
//! its own row downstream.

use ahash::AHashSet;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use thiserror::Error;

use crate::layers::LayerError;
use crate::layers::grid::GridGeometry;
use crate::layers::proj::EqualAreaProjection;
use crate::layers::stack::LayerStack;
use crate::occurrence::clean::PresenceRecord;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error("no presence records fall inside the analysis grid")]
    NoPresencesOnGrid,

    #[error("{requested} absences requested but only {eligible} cells are eligible")]
    TooFewEligibleCells { requested: usize, eligible: usize },
}

/// A cell of the analysis grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

/// Presence records mapped onto the analysis grid.
#[derive(Debug)]
pub struct PlacedPresences {
    /// One cell per retained record, in input order.
    pub cells: Vec<GridCell>,
    /// Records whose coordinates fall outside the grid extent.
    pub dropped_outside: usize,
}

/// Map cleaned records onto the grid, projecting through the grid's
/// reference system. Records outside the extent are counted and dropped;
/// an empty result is an error because nothing downstream can run.
pub fn place_presences(
    geometry: &GridGeometry,
    records: &[PresenceRecord],
) -> Result<PlacedPresences, SampleError> {
    let projection = EqualAreaProjection::for_crs(&geometry.crs);

    let mut cells = Vec::with_capacity(records.len());
    let mut dropped_outside = 0usize;
    for record in records {
        let (x, y) = match &projection {
            Some(p) => p.forward(record.longitude, record.latitude),
            None => (record.longitude, record.latitude),
        };
        match geometry.locate(x, y) {
            Some((row, col)) => cells.push(GridCell { row, col }),
            None => dropped_outside += 1,
        }
    }

    if cells.is_empty() {
        return Err(SampleError::NoPresencesOnGrid);
    }
    Ok(PlacedPresences {
        cells,
        dropped_outside,
    })
}

/// Draw `count` pseudo-absence cells without replacement.
///
/// Eligible cells have strictly positive elevation (no-data elevation
/// never qualifies, since NaN fails the comparison) and carry no presence.
/// Eligibility is enumerated in row-major order, so a fixed seed fixes the
/// draw.
pub fn sample_absences(
    stack: &LayerStack,
    elevation_band: &str,
    presence_cells: &[GridCell],
    count: usize,
    seed: u64,
) -> Result<Vec<GridCell>, SampleError> {
    let elevation = stack.band(elevation_band)?;
    let occupied: AHashSet<GridCell> = presence_cells.iter().copied().collect();

    let mut eligible = Vec::new();
    for ((row, col), &elev) in elevation.indexed_iter() {
        if elev > 0.0 && !occupied.contains(&GridCell { row, col }) {
            eligible.push(GridCell { row, col });
        }
    }
    if eligible.len() < count {
        return Err(SampleError::TooFewEligibleCells {
            requested: count,
            eligible: eligible.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let chosen = index::sample(&mut rng, eligible.len(), count);
    Ok(chosen.iter().map(|i| eligible[i]).collect())
}
