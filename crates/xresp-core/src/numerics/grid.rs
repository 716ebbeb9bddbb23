use crate::common::constants::{GRID_EDGE_TOLERANCE, KEV_ANGSTROM};
use crate::domain::XrespError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridUnit {
    #[default]
    Kev,
    Ev,
    Mev,
    Angstrom,
    Nm,
}

impl GridUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kev => "keV",
            Self::Ev => "eV",
            Self::Mev => "MeV",
            Self::Angstrom => "Angstrom",
            Self::Nm => "nm",
        }
    }

    pub const fn is_wavelength(self) -> bool {
        matches!(self, Self::Angstrom | Self::Nm)
    }

    /// Multiplier taking a value in this unit to keV (energy family) or
    /// Angstrom (wavelength family).
    const fn family_scale(self) -> f64 {
        match self {
            Self::Kev | Self::Angstrom => 1.0,
            Self::Ev => 1.0e-3,
            Self::Mev => 1.0e3,
            Self::Nm => 10.0,
        }
    }
}

impl Display for GridUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for GridUnit {
    type Err = XrespError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kev" => Ok(Self::Kev),
            "ev" => Ok(Self::Ev),
            "mev" => Ok(Self::Mev),
            "a" | "angstrom" | "angstroms" => Ok(Self::Angstrom),
            "nm" => Ok(Self::Nm),
            other => Err(XrespError::input_validation(
                "GRID.UNIT",
                format!("unsupported grid unit '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("grid must contain at least one bin")]
    Empty,
    #[error("grid edge arrays differ in length: lo={lo}, hi={hi}")]
    LengthMismatch { lo: usize, hi: usize },
    #[error("grid edge must be finite at bin {index}, got {value}")]
    NonFinite { index: usize, value: f64 },
    #[error("wavelength edge must be positive at bin {index}, got {value}")]
    NonPositiveWavelength { index: usize, value: f64 },
    #[error("bin {index} has non-positive width: lo={lo}, hi={hi}")]
    NonPositiveWidth { index: usize, lo: f64, hi: f64 },
    #[error("grid is not monotonic at bin {index}: previous hi={previous_hi} > lo={lo}")]
    NonMonotonic {
        index: usize,
        previous_hi: f64,
        lo: f64,
    },
}

impl From<GridError> for XrespError {
    fn from(error: GridError) -> Self {
        let placeholder = match error {
            GridError::Empty => "GRID.EMPTY",
            GridError::LengthMismatch { .. } => "GRID.LENGTH",
            GridError::NonFinite { .. } => "GRID.NON_FINITE",
            GridError::NonPositiveWavelength { .. } => "GRID.WAVELENGTH",
            GridError::NonPositiveWidth { .. } => "GRID.WIDTH",
            GridError::NonMonotonic { .. } => "GRID.NON_MONOTONIC",
        };
        match error {
            GridError::LengthMismatch { lo, hi } => {
                XrespError::size_mismatch(placeholder, "grid hi edges vs lo edges", lo, hi)
            }
            other => XrespError::grid_invalid(placeholder, other.to_string()),
        }
    }
}

/// Ascending energy grid in keV.
///
/// Bins satisfy `lo[i] < hi[i] <= lo[i + 1]` up to a relative edge tolerance.
/// Gaps between bins are allowed; overlaps are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid", into = "RawGrid")]
pub struct Grid {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawGrid {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl TryFrom<RawGrid> for Grid {
    type Error = GridError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        Grid::new(raw.lo, raw.hi)
    }
}

impl From<Grid> for RawGrid {
    fn from(grid: Grid) -> Self {
        RawGrid {
            lo: grid.lo,
            hi: grid.hi,
        }
    }
}

impl Grid {
    /// Validates already-ascending keV edges.
    pub fn new(lo: Vec<f64>, hi: Vec<f64>) -> Result<Self, GridError> {
        validate_ascending(&lo, &hi)?;
        Ok(Self { lo, hi })
    }

    /// Builds `count` contiguous bins of equal width spanning `[min, max)` keV.
    pub fn linear(min: f64, max: f64, count: usize) -> Result<Self, GridError> {
        if count == 0 {
            return Err(GridError::Empty);
        }
        let step = (max - min) / count as f64;
        let lo: Vec<f64> = (0..count).map(|i| min + step * i as f64).collect();
        let mut hi: Vec<f64> = lo.iter().skip(1).copied().collect();
        hi.push(max);
        Self::new(lo, hi)
    }

    pub fn len(&self) -> usize {
        self.lo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lo.is_empty()
    }

    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    pub fn width(&self, index: usize) -> f64 {
        self.hi[index] - self.lo[index]
    }

    pub fn min(&self) -> f64 {
        self.lo[0]
    }

    pub fn max(&self) -> f64 {
        self.hi[self.hi.len() - 1]
    }

    /// Index of the bin containing `value`, if any.
    pub fn find_bin(&self, value: f64) -> Option<usize> {
        let upper = self.lo.partition_point(|lo| *lo <= value);
        if upper == 0 {
            return None;
        }
        let index = upper - 1;
        (value < self.hi[index]).then_some(index)
    }

    /// True when both grids have the same length and every edge agrees to
    /// within `fractional_tolerance` of the local bin width.
    pub fn matches(&self, other: &Grid, fractional_tolerance: f64) -> bool {
        if self.len() != other.len() {
            return false;
        }
        (0..self.len()).all(|i| {
            let scale = self.width(i).min(other.width(i));
            (self.lo[i] - other.lo[i]).abs() <= fractional_tolerance * scale
                && (self.hi[i] - other.hi[i]).abs() <= fractional_tolerance * scale
        })
    }

    /// Edges expressed in `unit`, ascending in that unit.
    pub fn edges_in(&self, unit: GridUnit) -> (Vec<f64>, Vec<f64>) {
        let scale = unit.family_scale();
        if unit.is_wavelength() {
            let lo = self.hi.iter().rev().map(|e| KEV_ANGSTROM / e / scale).collect();
            let hi = self.lo.iter().rev().map(|e| KEV_ANGSTROM / e / scale).collect();
            (lo, hi)
        } else {
            let lo = self.lo.iter().map(|e| e / scale).collect();
            let hi = self.hi.iter().map(|e| e / scale).collect();
            (lo, hi)
        }
    }

    pub fn into_edges(self) -> (Vec<f64>, Vec<f64>) {
        (self.lo, self.hi)
    }
}

/// A canonicalized grid plus whether the input bin order had to be reversed.
///
/// When `reversed` is set, every per-bin array read alongside the edges must
/// be reversed by the caller as well.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalGrid {
    pub grid: Grid,
    pub reversed: bool,
}

/// Converts raw edges in `unit` to an ascending keV grid.
pub fn canonicalize(lo: &[f64], hi: &[f64], unit: GridUnit) -> Result<CanonicalGrid, GridError> {
    if lo.len() != hi.len() {
        return Err(GridError::LengthMismatch {
            lo: lo.len(),
            hi: hi.len(),
        });
    }
    if lo.is_empty() {
        return Err(GridError::Empty);
    }
    for (index, value) in lo.iter().chain(hi.iter()).copied().enumerate() {
        if !value.is_finite() {
            return Err(GridError::NonFinite {
                index: index % lo.len(),
                value,
            });
        }
    }

    let scale = unit.family_scale();
    let (mut kev_lo, mut kev_hi): (Vec<f64>, Vec<f64>) = if unit.is_wavelength() {
        let mut kev_lo = Vec::with_capacity(lo.len());
        let mut kev_hi = Vec::with_capacity(lo.len());
        for index in 0..lo.len() {
            let (wl_lo, wl_hi) = (lo[index] * scale, hi[index] * scale);
            for value in [wl_lo, wl_hi] {
                if value <= 0.0 {
                    return Err(GridError::NonPositiveWavelength { index, value });
                }
            }
            kev_lo.push(KEV_ANGSTROM / wl_hi);
            kev_hi.push(KEV_ANGSTROM / wl_lo);
        }
        (kev_lo, kev_hi)
    } else {
        (
            lo.iter().map(|e| e * scale).collect(),
            hi.iter().map(|e| e * scale).collect(),
        )
    };

    let last = kev_lo.len() - 1;
    let reversed = last > 0 && kev_lo[0] > kev_lo[last];
    if reversed {
        kev_lo.reverse();
        kev_hi.reverse();
    }

    Ok(CanonicalGrid {
        grid: Grid::new(kev_lo, kev_hi)?,
        reversed,
    })
}

fn validate_ascending(lo: &[f64], hi: &[f64]) -> Result<(), GridError> {
    if lo.len() != hi.len() {
        return Err(GridError::LengthMismatch {
            lo: lo.len(),
            hi: hi.len(),
        });
    }
    if lo.is_empty() {
        return Err(GridError::Empty);
    }

    for index in 0..lo.len() {
        let (bin_lo, bin_hi) = (lo[index], hi[index]);
        if !bin_lo.is_finite() {
            return Err(GridError::NonFinite {
                index,
                value: bin_lo,
            });
        }
        if !bin_hi.is_finite() {
            return Err(GridError::NonFinite {
                index,
                value: bin_hi,
            });
        }
        if bin_hi <= bin_lo {
            return Err(GridError::NonPositiveWidth {
                index,
                lo: bin_lo,
                hi: bin_hi,
            });
        }
        if index > 0 {
            let previous_hi = hi[index - 1];
            let slack = GRID_EDGE_TOLERANCE * previous_hi.abs().max(bin_lo.abs()).max(1.0);
            if previous_hi - bin_lo > slack {
                return Err(GridError::NonMonotonic {
                    index,
                    previous_hi,
                    lo: bin_lo,
                });
            }
        }
    }

    Ok(())
}

/// Reverses `values` when the grid it was read with had to be reversed.
pub fn reverse_if<T>(reversed: bool, values: &mut [T]) {
    if reversed {
        values.reverse();
    }
}
