//! Redistribution matrices.
//!
//! Rows are indexed by input (energy) bin in ascending energy order and
//! columns by output channel, channel 0 being the lowest-energy channel.
//! Both orderings are fixed when the matrix is built, so [`RedistributionMatrix::fold`]
//! never needs to flip indices.

mod delta;
mod parser;
mod rebin;

pub(crate) use parser::read_channel_bounds;
pub use parser::{read_redistribution_matrix, EBOUNDS_EXTENSION, MATRIX_EXTENSIONS};
pub use rebin::extract_groups;

use crate::domain::{ObservationInfo, XrespError, XrespResult};
use crate::numerics::{stable_sum, Grid};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixBackend {
    /// Geometric overlap between the energy and channel grids.
    Delta,
    /// General sparse groups read from a calibration table.
    File,
}

/// A contiguous run of channels with response for one energy bin.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseGroup {
    first_channel: usize,
    weights: Vec<f64>,
}

impl ResponseGroup {
    pub fn new(first_channel: usize, weights: Vec<f64>) -> Self {
        Self {
            first_channel,
            weights,
        }
    }

    pub fn first_channel(&self) -> usize {
        self.first_channel
    }

    pub fn channel_count(&self) -> usize {
        self.weights.len()
    }

    /// One past the last channel of the group.
    pub fn end_channel(&self) -> usize {
        self.first_channel + self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// A group as read from a table, before its span is checked.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawGroup {
    pub(crate) first_channel: i64,
    pub(crate) weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct MatrixLayout {
    pub(crate) channel_offset: i64,
    pub(crate) threshold: f64,
    pub(crate) channels_renumbered: bool,
    pub(crate) ebounds_rows_reversed: bool,
    pub(crate) energy_rows_reversed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedistributionMatrix {
    backend: MatrixBackend,
    energy_grid: Grid,
    channel_grid: Grid,
    rows: Vec<Vec<ResponseGroup>>,
    layout: MatrixLayout,
    info: ObservationInfo,
    pristine: Option<Box<RedistributionMatrix>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixSummary {
    pub backend: MatrixBackend,
    pub energy_bins: usize,
    pub channels: usize,
    pub groups: usize,
    pub total_weight: f64,
    pub energy_min_kev: f64,
    pub energy_max_kev: f64,
    pub channel_min_kev: f64,
    pub channel_max_kev: f64,
    pub channel_offset: i64,
    pub threshold: f64,
    pub channels_renumbered: bool,
    pub ebounds_rows_reversed: bool,
    pub energy_rows_reversed: bool,
    pub rebinned: bool,
}

impl RedistributionMatrix {
    /// Assembles a matrix from unchecked groups.
    ///
    /// Groups whose span leaves `[0, channels)` are dropped and negative
    /// weights zeroed, each reported once. A matrix left without any
    /// positive weight is rejected.
    pub(crate) fn from_raw_rows(
        backend: MatrixBackend,
        energy_grid: Grid,
        channel_grid: Grid,
        raw_rows: Vec<Vec<RawGroup>>,
        layout: MatrixLayout,
    ) -> XrespResult<Self> {
        if raw_rows.len() != energy_grid.len() {
            return Err(XrespError::size_mismatch(
                "RMF.ROW_COUNT",
                "matrix rows vs energy grid",
                energy_grid.len(),
                raw_rows.len(),
            ));
        }

        let channels = channel_grid.len() as i64;
        let mut dropped = 0_usize;
        let mut negative = 0_usize;
        let mut rows = Vec::with_capacity(raw_rows.len());

        for raw_groups in raw_rows {
            let mut groups = Vec::with_capacity(raw_groups.len());
            for raw in raw_groups {
                let end = raw.first_channel + raw.weights.len() as i64;
                if raw.first_channel < 0 || end > channels {
                    dropped += 1;
                    continue;
                }
                let mut weights = raw.weights;
                for weight in weights.iter_mut() {
                    if weight.is_nan() || *weight < 0.0 {
                        *weight = 0.0;
                        negative += 1;
                    }
                }
                groups.push(ResponseGroup::new(raw.first_channel as usize, weights));
            }
            rows.push(groups);
        }

        if dropped > 0 {
            warn!(
                dropped,
                channels, "dropped response groups whose channel span is out of range"
            );
        }
        if negative > 0 {
            warn!(count = negative, "negative or NaN response weights were zeroed");
        }

        let matrix = Self {
            backend,
            energy_grid,
            channel_grid,
            rows,
            layout,
            info: ObservationInfo::default(),
            pristine: None,
        };
        if matrix.total_weight() <= 0.0 {
            return Err(XrespError::corrupt_group(
                "RMF.NO_VALID_WEIGHT",
                format!(
                    "matrix has no positive response weight after validation ({dropped} groups dropped)"
                ),
            ));
        }
        Ok(matrix)
    }

    pub fn with_info(mut self, info: ObservationInfo) -> Self {
        self.info = info;
        self
    }

    pub fn backend(&self) -> MatrixBackend {
        self.backend
    }

    pub fn energy_grid(&self) -> &Grid {
        &self.energy_grid
    }

    pub fn channel_grid(&self) -> &Grid {
        &self.channel_grid
    }

    pub fn num_energy_bins(&self) -> usize {
        self.energy_grid.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channel_grid.len()
    }

    pub fn groups(&self, row: usize) -> &[ResponseGroup] {
        &self.rows[row]
    }

    pub fn info(&self) -> &ObservationInfo {
        &self.info
    }

    pub fn threshold(&self) -> f64 {
        self.layout.threshold
    }

    pub fn channels_renumbered(&self) -> bool {
        self.layout.channels_renumbered
    }

    /// True once the channel axis differs from the one the matrix was built with.
    pub fn is_rebinned(&self) -> bool {
        self.pristine.is_some()
    }

    /// Channel grid the matrix was read or synthesized with.
    pub fn original_channel_grid(&self) -> &Grid {
        self.pristine
            .as_deref()
            .map_or(&self.channel_grid, |pristine| &pristine.channel_grid)
    }

    pub fn group_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn total_weight(&self) -> f64 {
        let row_sums: Vec<f64> = self
            .rows
            .iter()
            .map(|groups| {
                groups
                    .iter()
                    .map(|group| stable_sum(group.weights()))
                    .sum::<f64>()
            })
            .collect();
        stable_sum(&row_sums)
    }

    /// Dense copy of one row over the channel axis.
    pub fn dense_row(&self, row: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.num_channels()];
        scatter_row(&self.rows[row], &mut dense);
        dense
    }

    /// Adds the redistributed `input` (one value per energy bin) into `output`
    /// (one value per channel).
    pub fn fold(&self, input: &[f64], output: &mut [f64]) -> XrespResult<()> {
        if input.len() != self.num_energy_bins() {
            return Err(XrespError::size_mismatch(
                "RMF.FOLD_INPUT",
                "fold input vs matrix energy bins",
                self.num_energy_bins(),
                input.len(),
            ));
        }
        if output.len() != self.num_channels() {
            return Err(XrespError::size_mismatch(
                "RMF.FOLD_OUTPUT",
                "fold output vs matrix channels",
                self.num_channels(),
                output.len(),
            ));
        }

        for (value, groups) in input.iter().copied().zip(&self.rows) {
            if value == 0.0 {
                continue;
            }
            for group in groups {
                let span = &mut output[group.first_channel..group.end_channel()];
                for (slot, weight) in span.iter_mut().zip(&group.weights) {
                    *slot += value * weight;
                }
            }
        }

        Ok(())
    }

    /// Energy-bin notice mask implied by a channel notice mask.
    ///
    /// An energy bin is noticed when it has positive weight in a noticed
    /// channel, or when it reaches no channel at all so that its
    /// contribution is never silently dropped.
    pub fn noticed_model_bins(&self, channel_notice: &[bool]) -> XrespResult<Vec<bool>> {
        if channel_notice.len() != self.num_channels() {
            return Err(XrespError::size_mismatch(
                "RMF.NOTICE_LENGTH",
                "channel notice mask vs matrix channels",
                self.num_channels(),
                channel_notice.len(),
            ));
        }

        let noticed = self
            .rows
            .iter()
            .map(|groups| {
                let mut detected = false;
                for group in groups {
                    for (offset, weight) in group.weights.iter().enumerate() {
                        if *weight > 0.0 {
                            detected = true;
                            if channel_notice[group.first_channel + offset] {
                                return true;
                            }
                        }
                    }
                }
                !detected
            })
            .collect();
        Ok(noticed)
    }

    pub fn summary(&self) -> MatrixSummary {
        MatrixSummary {
            backend: self.backend,
            energy_bins: self.num_energy_bins(),
            channels: self.num_channels(),
            groups: self.group_count(),
            total_weight: self.total_weight(),
            energy_min_kev: self.energy_grid.min(),
            energy_max_kev: self.energy_grid.max(),
            channel_min_kev: self.channel_grid.min(),
            channel_max_kev: self.channel_grid.max(),
            channel_offset: self.layout.channel_offset,
            threshold: self.layout.threshold,
            channels_renumbered: self.layout.channels_renumbered,
            ebounds_rows_reversed: self.layout.ebounds_rows_reversed,
            energy_rows_reversed: self.layout.energy_rows_reversed,
            rebinned: self.is_rebinned(),
        }
    }
}

/// Adds every group of a row into `dense`; overlapping groups accumulate.
fn scatter_row(groups: &[ResponseGroup], dense: &mut [f64]) {
    for group in groups {
        let span = &mut dense[group.first_channel..group.end_channel()];
        for (slot, weight) in span.iter_mut().zip(&group.weights) {
            *slot += weight;
        }
    }
}
