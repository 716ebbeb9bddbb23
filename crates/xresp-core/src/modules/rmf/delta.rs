use super::{MatrixBackend, MatrixLayout, RawGroup, RedistributionMatrix};
use crate::domain::XrespResult;
use crate::numerics::{overlap, Grid};

impl RedistributionMatrix {
    /// Identity-like matrix from grid geometry alone.
    ///
    /// Each energy bin gets at most one group covering the channels it
    /// overlaps; the weight of a channel is the fraction of the energy bin
    /// inside it. Coinciding grids give an exact identity.
    pub fn delta(energy_grid: &Grid, channel_grid: &Grid) -> XrespResult<Self> {
        let channel_lo = channel_grid.lo();
        let channel_hi = channel_grid.hi();

        let rows = (0..energy_grid.len())
            .map(|row| {
                let lo = energy_grid.lo()[row];
                let hi = energy_grid.hi()[row];
                let width = hi - lo;
                let first = channel_hi.partition_point(|edge| *edge <= lo);

                let weights: Vec<f64> = (first..channel_grid.len())
                    .take_while(|channel| channel_lo[*channel] < hi)
                    .map(|channel| {
                        overlap(lo, hi, channel_lo[channel], channel_hi[channel]) / width
                    })
                    .collect();

                if weights.is_empty() {
                    Vec::new()
                } else {
                    vec![RawGroup {
                        first_channel: first as i64,
                        weights,
                    }]
                }
            })
            .collect();

        Self::from_raw_rows(
            MatrixBackend::Delta,
            energy_grid.clone(),
            channel_grid.clone(),
            rows,
            MatrixLayout::default(),
        )
    }
}
