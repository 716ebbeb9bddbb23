pub mod grid;
pub mod overlap;

pub use grid::{canonicalize, reverse_if, CanonicalGrid, Grid, GridError, GridUnit};
pub use overlap::{
    overlap, rebin_integrated, rebin_weighted, union_grid, RebinError, WeightedRebin,
};

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

/// Compensated sum, used for totals that feed validation decisions.
pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}
