//! Response kernels: how a model flux becomes predicted channel counts.

use crate::domain::{BinValues, XrespError, XrespResult};
use crate::modules::arf::EffectiveArea;
use crate::modules::rmf::RedistributionMatrix;
use std::fmt::Debug;

pub trait ResponseKernel: Debug {
    fn name(&self) -> &'static str;

    /// Adds the counts predicted for `flux` (one value per effective-area
    /// bin) into `output` (one value per matrix channel).
    fn fold(
        &self,
        arf: &EffectiveArea,
        rmf: &RedistributionMatrix,
        flux: &[f64],
        output: &mut [f64],
    ) -> XrespResult<()>;

    /// Per-channel flux-correction weights, when the kernel defines its own.
    ///
    /// `None` means the caller folds a unit source through [`Self::fold`].
    fn flux_weights(
        &self,
        _arf: &EffectiveArea,
        _rmf: &RedistributionMatrix,
    ) -> XrespResult<Option<Vec<f64>>> {
        Ok(None)
    }
}

/// Model times area, fractional exposure and exposure time, then redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StandardKernel;

impl ResponseKernel for StandardKernel {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn fold(
        &self,
        arf: &EffectiveArea,
        rmf: &RedistributionMatrix,
        flux: &[f64],
        output: &mut [f64],
    ) -> XrespResult<()> {
        let source = incident_counts(arf, rmf, flux, None)?;
        rmf.fold(&source, output)
    }
}

/// Standard kernel with an extra per-model-bin transmission factor.
///
/// The factor also enters the flux-correction weights, so corrected data are
/// comparable with the untransmitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryKernel {
    transmission: BinValues,
}

impl AuxiliaryKernel {
    pub fn new(transmission: BinValues) -> XrespResult<Self> {
        let invalid = match &transmission {
            BinValues::Scalar(value) => !value.is_finite() || *value < 0.0,
            BinValues::Vector(values) => values.iter().any(|value| !value.is_finite() || *value < 0.0),
        };
        if invalid {
            return Err(XrespError::input_validation(
                "KERNEL.TRANSMISSION",
                "transmission factors must be finite and non-negative",
            ));
        }
        Ok(Self { transmission })
    }

    pub fn transmission(&self) -> &BinValues {
        &self.transmission
    }
}

impl ResponseKernel for AuxiliaryKernel {
    fn name(&self) -> &'static str {
        "auxiliary"
    }

    fn fold(
        &self,
        arf: &EffectiveArea,
        rmf: &RedistributionMatrix,
        flux: &[f64],
        output: &mut [f64],
    ) -> XrespResult<()> {
        let source = incident_counts(arf, rmf, flux, Some(&self.transmission))?;
        rmf.fold(&source, output)
    }

    fn flux_weights(
        &self,
        arf: &EffectiveArea,
        rmf: &RedistributionMatrix,
    ) -> XrespResult<Option<Vec<f64>>> {
        let mut weights = vec![0.0; rmf.num_channels()];
        self.fold(arf, rmf, &vec![1.0; arf.len()], &mut weights)?;
        Ok(Some(weights))
    }
}

/// Folds a unit source through `kernel`, the default flux-correction weight.
pub fn unit_source_weights(
    kernel: &dyn ResponseKernel,
    arf: &EffectiveArea,
    rmf: &RedistributionMatrix,
) -> XrespResult<Vec<f64>> {
    if let Some(weights) = kernel.flux_weights(arf, rmf)? {
        return Ok(weights);
    }
    let mut weights = vec![0.0; rmf.num_channels()];
    kernel.fold(arf, rmf, &vec![1.0; arf.len()], &mut weights)?;
    Ok(weights)
}

fn incident_counts(
    arf: &EffectiveArea,
    rmf: &RedistributionMatrix,
    flux: &[f64],
    transmission: Option<&BinValues>,
) -> XrespResult<Vec<f64>> {
    if flux.len() != arf.len() {
        return Err(XrespError::size_mismatch(
            "KERNEL.FLUX_LENGTH",
            "model flux vs effective area bins",
            arf.len(),
            flux.len(),
        ));
    }
    if arf.len() != rmf.num_energy_bins() {
        return Err(XrespError::size_mismatch(
            "KERNEL.ARF_RMF",
            "effective area bins vs matrix energy bins",
            rmf.num_energy_bins(),
            arf.len(),
        ));
    }
    if let Some(BinValues::Vector(values)) = transmission {
        if values.len() != arf.len() {
            return Err(XrespError::size_mismatch(
                "KERNEL.TRANSMISSION_LENGTH",
                "transmission factors vs effective area bins",
                arf.len(),
                values.len(),
            ));
        }
    }

    let exposure = arf.exposure();
    let frac_expo = arf.frac_expo();
    Ok(flux
        .iter()
        .zip(arf.area())
        .enumerate()
        .map(|(index, (value, area))| {
            let factor = transmission.map_or(1.0, |values| values.get(index));
            value * area * frac_expo.get(index) * exposure * factor
        })
        .collect())
}
