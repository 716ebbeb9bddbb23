//! Grouping of original bins into working bins.
//!
//! A grouping mask holds one flag per original bin. Consecutive non-zero
//! flags of the same sign belong to one working bin and a sign change starts
//! the next one, so groups are written as alternating runs of `+1` and `-1`.
//! A zero flag leaves its bin out of every working bin and ends the run it
//! sits in, so every working bin covers consecutive original bins.

use crate::domain::{XrespError, XrespResult};
use crate::numerics::Grid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebinMap {
    mask: Vec<i32>,
    groups: Vec<Vec<usize>>,
}

impl RebinMap {
    /// One working bin per original bin.
    pub fn identity(bins: usize) -> Self {
        let mask = (0..bins)
            .map(|index| if index % 2 == 0 { 1 } else { -1 })
            .collect();
        let groups = (0..bins).map(|index| vec![index]).collect();
        Self { mask, groups }
    }

    pub fn from_mask(mask: &[i32]) -> XrespResult<Self> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current_sign = 0;

        for (index, flag) in mask.iter().copied().enumerate() {
            let sign = flag.signum();
            if sign == 0 {
                current_sign = 0;
                continue;
            }
            if sign == current_sign {
                if let Some(group) = groups.last_mut() {
                    group.push(index);
                }
            } else {
                groups.push(vec![index]);
                current_sign = sign;
            }
        }

        if groups.is_empty() {
            return Err(XrespError::input_validation(
                "REBIN.EMPTY_MASK",
                "grouping mask excludes every bin",
            ));
        }

        Ok(Self {
            mask: mask.iter().map(|flag| flag.signum()).collect(),
            groups,
        })
    }

    /// Greedy grouping reaching at least `threshold` counts per working bin.
    ///
    /// Bins with `usable[i] == false` are excluded and close the group in
    /// progress. A group left short of the threshold, at the end or before an
    /// excluded bin, joins the adjacent previous group when the merged total
    /// still reaches the threshold, and otherwise stays on its own.
    pub fn min_counts(counts: &[f64], usable: &[bool], threshold: f64) -> XrespResult<Self> {
        if counts.len() != usable.len() {
            return Err(XrespError::size_mismatch(
                "REBIN.USABLE_LENGTH",
                "usable-bin mask vs counts",
                counts.len(),
                usable.len(),
            ));
        }
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(XrespError::input_validation(
                "REBIN.MIN_COUNTS",
                format!("minimum counts must be positive, got {threshold}"),
            ));
        }

        let mut mask = vec![0; counts.len()];
        let mut sign = 1;
        let mut previous: Option<(i32, f64)> = None;
        let mut open: Vec<usize> = Vec::new();
        let mut accumulated = 0.0;

        for (index, value) in counts.iter().copied().enumerate() {
            if !usable[index] {
                if !open.is_empty() {
                    sign = close_short_group(
                        &mut mask,
                        &mut open,
                        previous,
                        accumulated,
                        threshold,
                        sign,
                    );
                    accumulated = 0.0;
                }
                previous = None;
                continue;
            }
            open.push(index);
            accumulated += value;
            if accumulated >= threshold {
                for member in open.drain(..) {
                    mask[member] = sign;
                }
                previous = Some((sign, accumulated));
                sign = -sign;
                accumulated = 0.0;
            }
        }

        if !open.is_empty() {
            close_short_group(&mut mask, &mut open, previous, accumulated, threshold, sign);
        }

        Self::from_mask(&mask)
    }

    pub fn mask(&self) -> &[i32] {
        &self.mask
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Number of working bins.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of original bins.
    pub fn original_len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_identity(&self) -> bool {
        self.groups.len() == self.mask.len()
    }

    pub fn includes(&self, original: usize) -> bool {
        self.mask.get(original).is_some_and(|flag| *flag != 0)
    }

    /// Sums original-bin values into working bins.
    pub fn sum(&self, values: &[f64]) -> XrespResult<Vec<f64>> {
        self.check_len("REBIN.SUM_LENGTH", values.len())?;
        Ok(self
            .groups
            .iter()
            .map(|group| group.iter().map(|index| values[*index]).sum())
            .collect())
    }

    /// Quadrature sum of original-bin errors per working bin.
    pub fn sum_quadrature(&self, errors: &[f64]) -> XrespResult<Vec<f64>> {
        self.check_len("REBIN.ERR_LENGTH", errors.len())?;
        Ok(self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|index| errors[*index] * errors[*index])
                    .sum::<f64>()
                    .sqrt()
            })
            .collect())
    }

    /// Working bin is flagged when any of its original bins is.
    pub fn any(&self, flags: &[bool]) -> XrespResult<Vec<bool>> {
        self.check_len("REBIN.FLAG_LENGTH", flags.len())?;
        Ok(self
            .groups
            .iter()
            .map(|group| group.iter().any(|index| flags[*index]))
            .collect())
    }

    /// Working grid spanning each group's first and last original bin.
    pub fn grid(&self, original: &Grid) -> XrespResult<Grid> {
        self.check_len("REBIN.GRID_LENGTH", original.len())?;
        let mut lo = Vec::with_capacity(self.groups.len());
        let mut hi = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            if let (Some(first), Some(last)) = (group.first(), group.last()) {
                lo.push(original.lo()[*first]);
                hi.push(original.hi()[*last]);
            }
        }
        Ok(Grid::new(lo, hi)?)
    }

    fn check_len(&self, placeholder: &'static str, actual: usize) -> XrespResult<()> {
        if actual != self.mask.len() {
            return Err(XrespError::size_mismatch(
                placeholder,
                "per-bin values vs grouping mask",
                self.mask.len(),
                actual,
            ));
        }
        Ok(())
    }
}

/// Flags a short group, merging it into the previous one when allowed, and
/// returns the sign for the next group.
fn close_short_group(
    mask: &mut [i32],
    open: &mut Vec<usize>,
    previous: Option<(i32, f64)>,
    accumulated: f64,
    threshold: f64,
    sign: i32,
) -> i32 {
    let (flag, next) = match previous {
        Some((previous_sign, previous_total)) if previous_total + accumulated >= threshold => {
            (previous_sign, sign)
        }
        _ => (sign, -sign),
    };
    for member in open.drain(..) {
        mask[member] = flag;
    }
    next
}
