//! Flux correction: counts divided by the integrated instrument response.

use crate::domain::{XrespError, XrespResult};
use crate::modules::spectrum::Spectrum;
use crate::numerics::{rebin_weighted, Grid};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FluxSpectrum {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    /// Bin-integrated flux per working bin.
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
    /// Summed response weight per working bin.
    pub weights: Vec<f64>,
}

impl FluxSpectrum {
    fn new(grid: &Grid, flux: Vec<f64>, flux_err: Vec<f64>, weights: Vec<f64>) -> Self {
        Self {
            lo: grid.lo().to_vec(),
            hi: grid.hi().to_vec(),
            flux,
            flux_err,
            weights,
        }
    }
}

/// Converts the background-subtracted counts of `spectrum` into flux.
///
/// `weights` holds the counts expected from a unit source, one value per
/// matrix channel. A working bin `H` gets the weighted mean
/// `flux(H) = sum(w(h) flux(h)) / sum(w(h))` of its original bins, which
/// equals its net counts over its summed weight. Weights may come on the
/// original channels or on a matrix already rebinned to the working bins;
/// both give the same result. Bins without response get zero flux and zero
/// error.
pub fn flux_correct(spectrum: &Spectrum, weights: &[f64]) -> XrespResult<FluxSpectrum> {
    if weights.len() == spectrum.num_original_bins() {
        correct_original(spectrum, weights)
    } else if weights.len() == spectrum.num_bins() {
        let background = spectrum.scaled_background()?;
        let (flux, flux_err) = divide(spectrum.counts(), &background, weights);
        Ok(FluxSpectrum::new(spectrum.grid(), flux, flux_err, weights.to_vec()))
    } else {
        Err(XrespError::size_mismatch(
            "FLUX.WEIGHT_LENGTH",
            "response weights vs spectrum bins",
            spectrum.num_original_bins(),
            weights.len(),
        ))
    }
}

fn correct_original(spectrum: &Spectrum, weights: &[f64]) -> XrespResult<FluxSpectrum> {
    let map = spectrum.rebin_map();
    let original = spectrum.orig_grid();
    let background = spectrum.scaled_background_original();

    let usable: Vec<f64> = weights
        .iter()
        .enumerate()
        .map(|(index, weight)| if map.includes(index) { *weight } else { 0.0 })
        .collect();
    let (flux, flux_err) = divide(spectrum.orig_counts(), &background, &usable);

    if map.is_identity() {
        return Ok(FluxSpectrum::new(original, flux, flux_err, usable));
    }

    // Working bins cover whole runs of original bins, so every overlap
    // fraction is zero or one.
    let merged = rebin_weighted(spectrum.grid(), original, &flux, &flux_err, &usable)?;
    Ok(FluxSpectrum::new(
        spectrum.grid(),
        merged.values,
        merged.errors,
        merged.weights,
    ))
}

fn divide(counts: &[f64], background: &[f64], weights: &[f64]) -> (Vec<f64>, Vec<f64>) {
    counts
        .iter()
        .zip(background)
        .zip(weights)
        .map(|((counts, background), weight)| {
            if *weight > 0.0 {
                (
                    (counts - background) / weight,
                    (counts + background).max(0.0).sqrt() / weight,
                )
            } else {
                (0.0, 0.0)
            }
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::flux_correct;
    use crate::domain::XrespErrorCategory;
    use crate::modules::spectrum::{Background, Spectrum, SpectrumInput};
    use crate::numerics::GridUnit;
    use approx::assert_relative_eq;

    fn spectrum(counts: Vec<f64>) -> Spectrum {
        let n = counts.len();
        Spectrum::new(SpectrumInput {
            lo: (0..n).map(|i| i as f64 + 1.0).collect(),
            hi: (0..n).map(|i| i as f64 + 2.0).collect(),
            unit: GridUnit::Kev,
            counts,
            exposure: 10.0,
            backscal: 1.0,
            ..SpectrumInput::default()
        })
        .unwrap()
    }

    #[test]
    fn correction_round_trips_to_net_counts() {
        let mut data = spectrum(vec![40.0, 90.0, 10.0]);
        data.set_background(Background::new(vec![20.0, 10.0, 0.0], 20.0, 1.0).unwrap())
            .unwrap();
        let weights = [4.0, 3.0, 0.5];
        let corrected = flux_correct(&data, &weights).unwrap();
        let net = [30.0, 85.0, 10.0];
        for index in 0..3 {
            assert_relative_eq!(corrected.flux[index] * weights[index], net[index], epsilon = 1.0e-12);
        }
        assert_relative_eq!(corrected.flux_err[0], 50.0_f64.sqrt() / 4.0);
    }

    #[test]
    fn grouped_flux_is_the_weighted_mean() {
        let mut data = spectrum(vec![10.0, 30.0, 5.0]);
        data.rebin(&[1, 1, -1]).unwrap();
        let corrected = flux_correct(&data, &[1.0, 3.0, 1.0]).unwrap();
        assert_eq!(corrected.flux.len(), 2);
        assert_relative_eq!(corrected.flux[0], 10.0, epsilon = 1.0e-12);
        assert_relative_eq!(corrected.weights[0], 4.0, epsilon = 1.0e-12);
        assert_relative_eq!(corrected.flux_err[0], 40.0_f64.sqrt() / 4.0, epsilon = 1.0e-12);
        assert_relative_eq!(corrected.flux[1], 5.0, epsilon = 1.0e-12);

        let direct = flux_correct(&data, &[4.0, 1.0]).unwrap();
        for index in 0..2 {
            assert_relative_eq!(corrected.flux[index], direct.flux[index], epsilon = 1.0e-12);
            assert_relative_eq!(corrected.flux_err[index], direct.flux_err[index], epsilon = 1.0e-12);
        }
    }

    #[test]
    fn grouped_correction_round_trips_to_net_counts() {
        let mut data = spectrum(vec![40.0, 90.0, 10.0, 7.0]);
        data.set_background(Background::new(vec![20.0, 10.0, 0.0, 4.0], 20.0, 1.0).unwrap())
            .unwrap();
        data.rebin(&[1, 1, 0, -1]).unwrap();
        let corrected = flux_correct(&data, &[4.0, 3.0, 0.5, 2.0]).unwrap();
        let net = data.counts().iter().zip(data.scaled_background().unwrap()).map(|(c, b)| c - b);
        for (index, net) in net.enumerate() {
            assert_relative_eq!(corrected.flux[index] * corrected.weights[index], net, epsilon = 1.0e-9);
        }
        assert_relative_eq!(corrected.weights[1], 2.0, epsilon = 1.0e-12);
    }

    #[test]
    fn weights_on_working_grid_apply_directly() {
        let mut data = spectrum(vec![10.0, 30.0, 5.0]);
        data.rebin(&[1, 1, -1]).unwrap();
        let corrected = flux_correct(&data, &[8.0, 5.0]).unwrap();
        assert_eq!(corrected.flux, vec![5.0, 1.0]);
    }

    #[test]
    fn zero_weight_bins_get_no_flux() {
        let data = spectrum(vec![10.0, 30.0]);
        let corrected = flux_correct(&data, &[0.0, 3.0]).unwrap();
        assert_eq!(corrected.flux[0], 0.0);
        assert_eq!(corrected.flux_err[0], 0.0);
        let error = flux_correct(&data, &[1.0; 5]).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::SizeMismatch);
    }
}
