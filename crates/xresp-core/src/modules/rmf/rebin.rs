use super::{scatter_row, RedistributionMatrix, ResponseGroup};
use crate::common::constants::GRID_EDGE_TOLERANCE;
use crate::domain::{XrespError, XrespResult};
use crate::numerics::{rebin_integrated, Grid};
use tracing::debug;

/// Splits a dense row into runs of values strictly above `threshold`.
pub fn extract_groups(values: &[f64], threshold: f64) -> Vec<ResponseGroup> {
    let mut groups = Vec::new();
    let mut start: Option<usize> = None;

    for (channel, value) in values.iter().copied().enumerate() {
        let kept = value > threshold;
        match (start, kept) {
            (None, true) => start = Some(channel),
            (Some(first), false) => {
                groups.push(ResponseGroup::new(first, values[first..channel].to_vec()));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        groups.push(ResponseGroup::new(first, values[first..].to_vec()));
    }

    groups
}

impl RedistributionMatrix {
    /// Moves the channel axis onto `target`.
    ///
    /// Rows are always rebuilt from the matrix as it was first built, so
    /// repeated rebins never compound. Weights at or below `threshold` are
    /// dropped. Returns `false` when `target` already is the channel grid.
    /// On failure the matrix is left untouched.
    pub fn rebin_channels(&mut self, target: &Grid, threshold: f64) -> XrespResult<bool> {
        if self.channel_grid.matches(target, GRID_EDGE_TOLERANCE) {
            return Ok(false);
        }

        let source = self.pristine.as_deref().unwrap_or(self);
        if source.channel_grid.matches(target, GRID_EDGE_TOLERANCE) {
            debug!(channels = target.len(), "restoring matrix channel axis");
            if let Some(pristine) = self.pristine.take() {
                *self = *pristine;
            }
            return Ok(true);
        }

        let mut dense = Vec::new();
        dense.try_reserve_exact(source.num_channels()).map_err(|error| {
            XrespError::allocation(
                "RMF.REBIN_SCRATCH",
                format!(
                    "cannot allocate a {}-channel rebin buffer: {error}",
                    source.num_channels()
                ),
            )
        })?;
        dense.resize(source.num_channels(), 0.0);

        let mut rows = Vec::with_capacity(source.rows.len());
        for groups in &source.rows {
            dense.fill(0.0);
            scatter_row(groups, &mut dense);
            let rebinned = rebin_integrated(target, &source.channel_grid, &dense)?;
            rows.push(extract_groups(&rebinned, threshold));
        }

        let mut rebinned = Self {
            backend: source.backend,
            energy_grid: source.energy_grid.clone(),
            channel_grid: target.clone(),
            rows,
            layout: source.layout.clone(),
            info: source.info.clone(),
            pristine: None,
        };
        rebinned.layout.threshold = threshold;
        if rebinned.total_weight() <= 0.0 {
            return Err(XrespError::corrupt_group(
                "RMF.REBIN_NO_WEIGHT",
                format!(
                    "rebinning onto {} channels over [{}, {}] keV leaves no response above {}",
                    target.len(),
                    target.min(),
                    target.max(),
                    threshold
                ),
            ));
        }

        debug!(
            from = source.num_channels(),
            to = target.len(),
            groups = rebinned.group_count(),
            "rebinned matrix channel axis"
        );
        let pristine = match self.pristine.take() {
            Some(pristine) => pristine,
            None => Box::new(self.clone()),
        };
        rebinned.pristine = Some(pristine);
        *self = rebinned;
        Ok(true)
    }
}
