//! Effective-area curves.

mod parser;

use crate::domain::{BinValues, ObservationInfo, XrespError, XrespResult};
use crate::numerics::{canonicalize, reverse_if, Grid, GridUnit};
use serde::Serialize;
use tracing::warn;

pub use parser::{read_effective_area, ARF_COLUMNS};

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveArea {
    grid: Grid,
    area: Vec<f64>,
    area_err: Vec<f64>,
    frac_expo: BinValues,
    exposure: f64,
    identity: bool,
    info: ObservationInfo,
}

/// Plain copy of an effective-area curve, edges in keV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaArrays {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    pub area: Vec<f64>,
    pub area_err: Vec<f64>,
}

/// Replacement arrays for [`EffectiveArea::put`], edges in `unit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaUpdate<'a> {
    pub lo: &'a [f64],
    pub hi: &'a [f64],
    pub area: &'a [f64],
    pub area_err: &'a [f64],
    pub unit: GridUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutReport {
    pub grid_mismatch: bool,
    pub reset_errors: usize,
}

impl EffectiveArea {
    pub fn new(
        grid: Grid,
        area: Vec<f64>,
        area_err: Vec<f64>,
        exposure: f64,
    ) -> XrespResult<Self> {
        check_len("ARF.AREA_LENGTH", "effective area values", grid.len(), area.len())?;
        check_len("ARF.ERR_LENGTH", "effective area errors", grid.len(), area_err.len())?;
        require_positive_area(&area)?;
        validate_exposure(exposure)?;
        Ok(Self {
            grid,
            area,
            area_err,
            frac_expo: BinValues::Scalar(1.0),
            exposure,
            identity: false,
            info: ObservationInfo::default(),
        })
    }

    /// Unit area on `grid`, used when no real curve is assigned.
    pub fn identity(grid: &Grid) -> Self {
        Self {
            grid: grid.clone(),
            area: vec![1.0; grid.len()],
            area_err: vec![0.0; grid.len()],
            frac_expo: BinValues::Scalar(1.0),
            exposure: 1.0,
            identity: true,
            info: ObservationInfo::default(),
        }
    }

    pub fn with_info(mut self, info: ObservationInfo) -> Self {
        self.info = info;
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn area(&self) -> &[f64] {
        &self.area
    }

    pub fn area_err(&self) -> &[f64] {
        &self.area_err
    }

    pub fn frac_expo(&self) -> &BinValues {
        &self.frac_expo
    }

    pub fn set_frac_expo(&mut self, frac_expo: BinValues) -> XrespResult<()> {
        if let BinValues::Vector(values) = &frac_expo {
            check_len("ARF.FRACEXPO_LENGTH", "fractional exposure", self.len(), values.len())?;
        }
        self.frac_expo = frac_expo;
        Ok(())
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn set_exposure(&mut self, exposure: f64) -> XrespResult<()> {
        validate_exposure(exposure)?;
        self.exposure = exposure;
        Ok(())
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn info(&self) -> &ObservationInfo {
        &self.info
    }

    /// Area times fractional exposure, per bin.
    pub fn effective_area(&self) -> Vec<f64> {
        self.area
            .iter()
            .enumerate()
            .map(|(index, area)| area * self.frac_expo.get(index))
            .collect()
    }

    pub fn get(&self) -> AreaArrays {
        AreaArrays {
            lo: self.grid.lo().to_vec(),
            hi: self.grid.hi().to_vec(),
            area: self.area.clone(),
            area_err: self.area_err.clone(),
        }
    }

    /// Replaces the curve in place.
    ///
    /// A grid that differs from the current one beyond `match_tolerance` is
    /// accepted with a warning, since any matrix built on the old grid may no
    /// longer line up. Non-positive errors become `default_uncertainty`.
    pub fn put(
        &mut self,
        update: AreaUpdate<'_>,
        match_tolerance: f64,
        default_uncertainty: f64,
    ) -> XrespResult<PutReport> {
        let AreaUpdate {
            lo,
            hi,
            area,
            area_err,
            unit,
        } = update;
        let canonical = canonicalize(lo, hi, unit)?;
        let n = canonical.grid.len();
        check_len("ARF.PUT_AREA_LENGTH", "effective area values", n, area.len())?;
        check_len("ARF.PUT_ERR_LENGTH", "effective area errors", n, area_err.len())?;
        if let BinValues::Vector(values) = &self.frac_expo {
            check_len(
                "ARF.PUT_FRACEXPO_LENGTH",
                "fractional exposure vs new grid",
                n,
                values.len(),
            )?;
        }
        require_positive_area(area)?;

        let mut area = area.to_vec();
        let mut area_err = area_err.to_vec();
        reverse_if(canonical.reversed, &mut area);
        reverse_if(canonical.reversed, &mut area_err);

        let mut report = PutReport {
            grid_mismatch: !self.grid.matches(&canonical.grid, match_tolerance),
            reset_errors: 0,
        };
        for err in area_err.iter_mut() {
            if err.is_nan() || *err <= 0.0 {
                *err = default_uncertainty;
                report.reset_errors += 1;
            }
        }

        if report.grid_mismatch {
            warn!(
                bins = n,
                "effective area grid changed; it may no longer match the attached redistribution matrix"
            );
        }
        if report.reset_errors > 0 {
            warn!(
                count = report.reset_errors,
                replacement = default_uncertainty,
                "non-positive effective area uncertainties were reset"
            );
        }

        self.grid = canonical.grid;
        self.area = area;
        self.area_err = area_err;
        self.identity = false;
        Ok(report)
    }
}

fn check_len(placeholder: &'static str, what: &str, expected: usize, actual: usize) -> XrespResult<()> {
    if expected != actual {
        return Err(XrespError::size_mismatch(placeholder, what, expected, actual));
    }
    Ok(())
}

fn require_positive_area(area: &[f64]) -> XrespResult<()> {
    if area.iter().any(|value| *value > 0.0) {
        Ok(())
    } else {
        Err(XrespError::input_validation(
            "ARF.NO_POSITIVE_AREA",
            "effective area has no positive bins",
        ))
    }
}

fn validate_exposure(exposure: f64) -> XrespResult<()> {
    if exposure.is_finite() && exposure >= 0.0 {
        Ok(())
    } else {
        Err(XrespError::input_validation(
            "ARF.EXPOSURE",
            format!("exposure must be finite and non-negative, got {exposure}"),
        ))
    }
}
