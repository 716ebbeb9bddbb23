//! Flux-conserving redistribution between arbitrary ascending grids.
//!
//! Each source bin shares its bin-integrated value among the target bins it
//! overlaps, in proportion to the overlapped fraction of its own width.
//! Grouping data, rebinning matrix rows, moving model flux from a shared
//! evaluation grid onto a spectrum grid and weighted flux rebinning all go
//! through [`rebin_integrated`].

use super::grid::{Grid, GridError};
use crate::common::constants::GRID_EDGE_TOLERANCE;
use crate::domain::XrespError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RebinError {
    #[error("value array has {values} entries but the source grid has {bins} bins")]
    LengthMismatch { bins: usize, values: usize },
    #[error("weight array has {weights} entries but the source grid has {bins} bins")]
    WeightLengthMismatch { bins: usize, weights: usize },
}

impl From<RebinError> for XrespError {
    fn from(error: RebinError) -> Self {
        match error {
            RebinError::LengthMismatch { bins, values } => {
                XrespError::size_mismatch("REBIN.VALUES", "rebin source values", bins, values)
            }
            RebinError::WeightLengthMismatch { bins, weights } => {
                XrespError::size_mismatch("REBIN.WEIGHTS", "rebin source weights", bins, weights)
            }
        }
    }
}

pub fn overlap(a_lo: f64, a_hi: f64, b_lo: f64, b_hi: f64) -> f64 {
    (a_hi.min(b_hi) - a_lo.max(b_lo)).max(0.0)
}

pub fn rebin_integrated(
    target: &Grid,
    source: &Grid,
    values: &[f64],
) -> Result<Vec<f64>, RebinError> {
    if values.len() != source.len() {
        return Err(RebinError::LengthMismatch {
            bins: source.len(),
            values: values.len(),
        });
    }

    let (target_lo, target_hi) = (target.lo(), target.hi());
    let mut output = vec![0.0; target.len()];
    let mut start = 0;

    for (index, value) in values.iter().copied().enumerate() {
        let lo = source.lo()[index];
        let hi = source.hi()[index];
        while start < target.len() && target_hi[start] <= lo {
            start += 1;
        }
        if value == 0.0 {
            continue;
        }

        let width = hi - lo;
        let mut k = start;
        while k < target.len() && target_lo[k] < hi {
            let shared = overlap(lo, hi, target_lo[k], target_hi[k]);
            if shared > 0.0 {
                output[k] += value * (shared / width);
            }
            k += 1;
        }
    }

    Ok(output)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedRebin {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    pub weights: Vec<f64>,
}

/// Weighted-mean rebin: `value(H) = sum(w v) / sum(w)` and
/// `err(H)^2 = sum(w^2 e^2) / sum(w)^2` over the source bins overlapping `H`.
pub fn rebin_weighted(
    target: &Grid,
    source: &Grid,
    values: &[f64],
    errors: &[f64],
    weights: &[f64],
) -> Result<WeightedRebin, RebinError> {
    for len in [values.len(), errors.len()] {
        if len != source.len() {
            return Err(RebinError::LengthMismatch {
                bins: source.len(),
                values: len,
            });
        }
    }
    if weights.len() != source.len() {
        return Err(RebinError::WeightLengthMismatch {
            bins: source.len(),
            weights: weights.len(),
        });
    }

    let weighted: Vec<f64> = values.iter().zip(weights).map(|(v, w)| v * w).collect();
    let weighted_var: Vec<f64> = errors
        .iter()
        .zip(weights)
        .map(|(e, w)| (e * w) * (e * w))
        .collect();

    let numerator = rebin_integrated(target, source, &weighted)?;
    let variance = rebin_integrated(target, source, &weighted_var)?;
    let weights = rebin_integrated(target, source, weights)?;

    let mut values = vec![0.0; target.len()];
    let mut errors = vec![0.0; target.len()];
    for index in 0..target.len() {
        let weight = weights[index];
        if weight > 0.0 {
            values[index] = numerator[index] / weight;
            errors[index] = variance[index].sqrt() / weight;
        }
    }

    Ok(WeightedRebin {
        values,
        errors,
        weights,
    })
}

/// Union of several grids: every distinct edge becomes a bin boundary and
/// only intervals covered by at least one input grid are kept.
pub fn union_grid(grids: &[&Grid]) -> Result<Grid, GridError> {
    let mut edges: Vec<f64> = grids
        .iter()
        .flat_map(|grid| grid.lo().iter().chain(grid.hi().iter()).copied())
        .collect();
    edges.sort_by(f64::total_cmp);
    edges.dedup_by(|next, kept| {
        (*next - *kept).abs() <= GRID_EDGE_TOLERANCE * kept.abs().max(1.0)
    });

    let mut lo = Vec::new();
    let mut hi = Vec::new();
    for pair in edges.windows(2) {
        let mid = 0.5 * (pair[0] + pair[1]);
        if grids.iter().any(|grid| grid.find_bin(mid).is_some()) {
            lo.push(pair[0]);
            hi.push(pair[1]);
        }
    }

    Grid::new(lo, hi)
}
