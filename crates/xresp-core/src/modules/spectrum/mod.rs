//! Observed and synthetic spectra.
//!
//! A spectrum keeps its original bins untouched and derives every working
//! array from them through a [`RebinMap`]. Grids are ascending keV, like
//! every other grid in the engine.

mod grouping;
mod parser;

pub use grouping::RebinMap;
pub use parser::{parse_ascii_spectrum, read_spectrum, SPECTRUM_EXTENSION};

use crate::common::config::{EngineConfig, StatErrPolicy};
use crate::common::constants::DEFAULT_UNCERTAINTY;
use crate::domain::{ObservationInfo, XrespError, XrespResult};
use crate::modules::kernel::{ResponseKernel, StandardKernel};
use crate::numerics::{canonicalize, overlap, reverse_if, Grid, GridUnit};
use tracing::{debug, warn};

/// Raw columns of a spectrum, in file order and in `unit`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectrumInput {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    pub unit: GridUnit,
    pub counts: Vec<f64>,
    pub stat_err: Option<Vec<f64>>,
    /// Fractional systematic error per bin.
    pub sys_err: Option<Vec<f64>>,
    /// Non-zero quality marks a bad bin.
    pub quality: Option<Vec<i64>>,
    pub exposure: f64,
    pub backscal: f64,
    pub info: ObservationInfo,
}

/// Background counts on the original bins of the spectrum they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    counts: Vec<f64>,
    exposure: f64,
    backscal: f64,
}

impl Background {
    pub fn new(counts: Vec<f64>, exposure: f64, backscal: f64) -> XrespResult<Self> {
        for (name, value) in [("exposure", exposure), ("BACKSCAL", backscal)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(XrespError::input_validation(
                    "BACKGROUND.SCALE",
                    format!("background {name} must be positive, got {value}"),
                ));
            }
        }
        Ok(Self {
            counts,
            exposure,
            backscal,
        })
    }

    /// Uses another spectrum's original counts as background.
    pub fn from_spectrum(spectrum: &Spectrum) -> XrespResult<Self> {
        Self::new(
            spectrum.orig_counts.clone(),
            spectrum.exposure,
            spectrum.backscal,
        )
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn backscal(&self) -> f64 {
        self.backscal
    }
}

#[derive(Debug)]
pub struct Spectrum {
    orig_grid: Grid,
    orig_counts: Vec<f64>,
    orig_stat_err: Vec<f64>,
    orig_sys_frac: Vec<f64>,
    quality_ok: Vec<bool>,
    orig_notice: Vec<bool>,
    exposure: f64,
    backscal: f64,
    stat_err_policy: StatErrPolicy,
    default_uncertainty: f64,
    map: RebinMap,
    grid: Grid,
    counts: Vec<f64>,
    stat_err: Vec<f64>,
    sys_err: Vec<f64>,
    notice: Vec<bool>,
    background: Option<Background>,
    kernel: Box<dyn ResponseKernel>,
    info: ObservationInfo,
}

impl Spectrum {
    /// Builds a spectrum from raw columns.
    ///
    /// Rows stored in descending energy are reversed together with every
    /// per-bin column. Missing statistical errors default to `sqrt(counts)`,
    /// and non-positive errors become 1.
    pub fn new(input: SpectrumInput) -> XrespResult<Self> {
        let SpectrumInput {
            lo,
            hi,
            unit,
            mut counts,
            stat_err,
            sys_err,
            quality,
            exposure,
            backscal,
            info,
        } = input;

        let canonical = canonicalize(&lo, &hi, unit)?;
        let n = canonical.grid.len();
        check_len("SPECTRUM.COUNTS_LENGTH", "counts", n, counts.len())?;
        for (name, value) in [("exposure", exposure), ("BACKSCAL", backscal)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(XrespError::input_validation(
                    "SPECTRUM.SCALE",
                    format!("spectrum {name} must be positive, got {value}"),
                ));
            }
        }

        let mut stat_err = match stat_err {
            Some(errors) => {
                check_len("SPECTRUM.ERR_LENGTH", "statistical errors", n, errors.len())?;
                errors
            }
            None => counts.iter().map(|value| poisson_error(*value, DEFAULT_UNCERTAINTY)).collect(),
        };
        let mut sys_frac = match sys_err {
            Some(fractions) => {
                check_len("SPECTRUM.SYS_LENGTH", "systematic errors", n, fractions.len())?;
                fractions
            }
            None => vec![0.0; n],
        };
        let mut quality_ok: Vec<bool> = match quality {
            Some(flags) => {
                check_len("SPECTRUM.QUALITY_LENGTH", "quality flags", n, flags.len())?;
                flags.iter().map(|flag| *flag == 0).collect()
            }
            None => vec![true; n],
        };

        if canonical.reversed {
            debug!(bins = n, "spectrum stored in descending energy order");
        }
        reverse_if(canonical.reversed, &mut counts);
        reverse_if(canonical.reversed, &mut stat_err);
        reverse_if(canonical.reversed, &mut sys_frac);
        reverse_if(canonical.reversed, &mut quality_ok);

        let reset = reset_non_positive(&mut stat_err, DEFAULT_UNCERTAINTY);
        if reset > 0 {
            warn!(
                count = reset,
                replacement = DEFAULT_UNCERTAINTY,
                "non-positive statistical errors were reset"
            );
        }
        let bad = quality_ok.iter().filter(|ok| !**ok).count();
        if bad > 0 {
            debug!(count = bad, "bins with non-zero quality start ignored");
        }

        let map = RebinMap::identity(n);
        let mut spectrum = Self {
            grid: canonical.grid.clone(),
            orig_grid: canonical.grid,
            counts: counts.clone(),
            orig_counts: counts,
            stat_err: stat_err.clone(),
            orig_stat_err: stat_err,
            orig_sys_frac: sys_frac,
            orig_notice: quality_ok.clone(),
            notice: quality_ok.clone(),
            quality_ok,
            exposure,
            backscal,
            stat_err_policy: StatErrPolicy::default(),
            default_uncertainty: DEFAULT_UNCERTAINTY,
            map,
            sys_err: Vec::new(),
            background: None,
            kernel: Box::new(StandardKernel),
            info,
        };
        spectrum.rebuild()?;
        Ok(spectrum)
    }

    /// Applies the engine-wide error policy and rebuilds the working arrays.
    pub fn configure(&mut self, config: &EngineConfig) -> XrespResult<()> {
        self.stat_err_policy = config.stat_err_policy;
        self.default_uncertainty = config.default_uncertainty;
        self.rebuild()
    }

    pub fn orig_grid(&self) -> &Grid {
        &self.orig_grid
    }

    pub fn orig_counts(&self) -> &[f64] {
        &self.orig_counts
    }

    pub fn orig_stat_err(&self) -> &[f64] {
        &self.orig_stat_err
    }

    pub fn orig_notice(&self) -> &[bool] {
        &self.orig_notice
    }

    pub fn num_original_bins(&self) -> usize {
        self.orig_grid.len()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn num_bins(&self) -> usize {
        self.grid.len()
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn stat_err(&self) -> &[f64] {
        &self.stat_err
    }

    /// Absolute systematic error per working bin.
    pub fn sys_err(&self) -> &[f64] {
        &self.sys_err
    }

    pub fn notice(&self) -> &[bool] {
        &self.notice
    }

    pub fn noticed_count(&self) -> usize {
        self.notice.iter().filter(|noticed| **noticed).count()
    }

    pub fn rebin_map(&self) -> &RebinMap {
        &self.map
    }

    /// The current grouping mask, one flag per original bin.
    pub fn rebin_mask(&self) -> &[i32] {
        self.map.mask()
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn backscal(&self) -> f64 {
        self.backscal
    }

    pub fn info(&self) -> &ObservationInfo {
        &self.info
    }

    pub fn kernel(&self) -> &dyn ResponseKernel {
        self.kernel.as_ref()
    }

    pub fn set_kernel(&mut self, kernel: Box<dyn ResponseKernel>) {
        debug!(kernel = kernel.name(), "response kernel replaced");
        self.kernel = kernel;
    }

    pub fn set_sys_err(&mut self, fractions: Vec<f64>) -> XrespResult<()> {
        check_len(
            "SPECTRUM.SYS_LENGTH",
            "systematic errors",
            self.num_original_bins(),
            fractions.len(),
        )?;
        self.orig_sys_frac = fractions;
        self.rebuild()
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    pub fn set_background(&mut self, background: Background) -> XrespResult<()> {
        check_len(
            "SPECTRUM.BACKGROUND_LENGTH",
            "background counts",
            self.num_original_bins(),
            background.counts.len(),
        )?;
        self.background = Some(background);
        Ok(())
    }

    pub fn clear_background(&mut self) -> Option<Background> {
        self.background.take()
    }

    /// `(BACKSCAL_src / BACKSCAL_bkg) * (exposure_src / exposure_bkg)`, or 0
    /// without a background.
    pub fn background_scale(&self) -> f64 {
        self.background.as_ref().map_or(0.0, |background| {
            (self.backscal / background.backscal) * (self.exposure / background.exposure)
        })
    }

    /// Scaled background counts per original bin.
    pub fn scaled_background_original(&self) -> Vec<f64> {
        let scale = self.background_scale();
        match &self.background {
            Some(background) => background.counts.iter().map(|value| value * scale).collect(),
            None => vec![0.0; self.num_original_bins()],
        }
    }

    /// Scaled background counts per working bin.
    pub fn scaled_background(&self) -> XrespResult<Vec<f64>> {
        self.map.sum(&self.scaled_background_original())
    }

    /// Uncertainty used by fit statistics: statistical, systematic and
    /// scaled background errors added in quadrature.
    pub fn fit_uncertainty(&self) -> XrespResult<Vec<f64>> {
        let background_variance = match &self.background {
            Some(background) => {
                let scale = self.background_scale();
                self.map
                    .sum(&background.counts)?
                    .into_iter()
                    .map(|value| value.max(0.0) * scale * scale)
                    .collect()
            }
            None => vec![0.0; self.num_bins()],
        };
        Ok(self
            .stat_err
            .iter()
            .zip(&self.sys_err)
            .zip(background_variance)
            .map(|((stat, sys), bkg)| (stat * stat + sys * sys + bkg).sqrt())
            .collect())
    }

    /// Groups original bins with an alternating-sign mask.
    pub fn rebin(&mut self, mask: &[i32]) -> XrespResult<()> {
        check_len(
            "SPECTRUM.MASK_LENGTH",
            "grouping mask",
            self.num_original_bins(),
            mask.len(),
        )?;
        self.apply_map(RebinMap::from_mask(mask)?)
    }

    /// Groups noticed original bins until each holds at least `threshold` counts.
    pub fn group_min_counts(&mut self, threshold: f64) -> XrespResult<()> {
        let map = RebinMap::min_counts(&self.orig_counts, &self.orig_notice, threshold)?;
        self.apply_map(map)
    }

    /// Restores one working bin per original bin.
    pub fn unbin(&mut self) -> XrespResult<()> {
        self.apply_map(RebinMap::identity(self.num_original_bins()))
    }

    pub fn notice_all(&mut self) -> XrespResult<()> {
        self.orig_notice = self.quality_ok.clone();
        self.notice = self.map.any(&self.orig_notice)?;
        Ok(())
    }

    pub fn ignore_all(&mut self) -> XrespResult<()> {
        self.orig_notice.fill(false);
        self.notice = self.map.any(&self.orig_notice)?;
        Ok(())
    }

    /// Notices working bins overlapping `[lo, hi]` given in `unit`; returns
    /// how many working bins were touched.
    pub fn notice_range(&mut self, lo: f64, hi: f64, unit: GridUnit) -> XrespResult<usize> {
        self.set_range(lo, hi, unit, true)
    }

    pub fn ignore_range(&mut self, lo: f64, hi: f64, unit: GridUnit) -> XrespResult<usize> {
        self.set_range(lo, hi, unit, false)
    }

    fn set_range(&mut self, lo: f64, hi: f64, unit: GridUnit, noticed: bool) -> XrespResult<usize> {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let range = canonicalize(&[lo], &[hi], unit)?.grid;
        let (range_lo, range_hi) = (range.min(), range.max());

        let mut touched = 0;
        for (index, group) in self.map.groups().iter().enumerate() {
            if overlap(self.grid.lo()[index], self.grid.hi()[index], range_lo, range_hi) <= 0.0 {
                continue;
            }
            touched += 1;
            for member in group {
                self.orig_notice[*member] = noticed && self.quality_ok[*member];
            }
        }
        self.notice = self.map.any(&self.orig_notice)?;
        Ok(touched)
    }

    fn apply_map(&mut self, map: RebinMap) -> XrespResult<()> {
        let previous = std::mem::replace(&mut self.map, map);
        if let Err(error) = self.rebuild() {
            self.map = previous;
            self.rebuild()?;
            return Err(error);
        }
        debug!(
            original = self.num_original_bins(),
            working = self.num_bins(),
            "spectrum regrouped"
        );
        Ok(())
    }

    fn rebuild(&mut self) -> XrespResult<()> {
        let grid = self.map.grid(&self.orig_grid)?;
        let counts = self.map.sum(&self.orig_counts)?;
        let stat_err = match self.stat_err_policy {
            StatErrPolicy::Quadrature => self.map.sum_quadrature(&self.orig_stat_err)?,
            StatErrPolicy::Poisson => counts
                .iter()
                .map(|value| poisson_error(*value, self.default_uncertainty))
                .collect(),
        };
        let systematic: Vec<f64> = self
            .orig_counts
            .iter()
            .zip(&self.orig_sys_frac)
            .map(|(value, fraction)| value * fraction)
            .collect();
        let sys_err = self
            .map
            .sum(&systematic)?
            .into_iter()
            .map(f64::abs)
            .collect();
        let notice = self.map.any(&self.orig_notice)?;

        self.grid = grid;
        self.counts = counts;
        self.stat_err = stat_err;
        self.sys_err = sys_err;
        self.notice = notice;
        Ok(())
    }
}

fn poisson_error(counts: f64, floor: f64) -> f64 {
    if counts > 0.0 { counts.sqrt() } else { floor }
}

fn reset_non_positive(errors: &mut [f64], replacement: f64) -> usize {
    let mut reset = 0;
    for err in errors.iter_mut() {
        if err.is_nan() || *err <= 0.0 {
            *err = replacement;
            reset += 1;
        }
    }
    reset
}

fn check_len(placeholder: &'static str, what: &str, expected: usize, actual: usize) -> XrespResult<()> {
    if expected != actual {
        return Err(XrespError::size_mismatch(placeholder, what, expected, actual));
    }
    Ok(())
}
