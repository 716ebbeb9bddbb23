//! The engine session: calibration products, spectra and model folding.
//!
//! Effective areas and matrices live in arenas and are shared by handle.
//! Each spectrum keeps the response pairs it was assigned and a derived set
//! of fit pairs, which may substitute ideal components depending on the
//! configuration. Both sets hold an in-use reference on what they name.

use crate::common::config::EngineConfig;
use crate::domain::{ArfId, ResponsePair, RmfId, SpectrumId, XrespError, XrespResult};
use crate::modules::arena::Arena;
use crate::modules::arf::{read_effective_area, AreaUpdate, EffectiveArea, PutReport};
use crate::modules::evalgrid::{strategy_from_config, EvalGridCache, EvalGridKey, EvalGridStrategy};
use crate::modules::flux::{flux_correct, FluxSpectrum};
use crate::modules::kernel::{unit_source_weights, ResponseKernel};
use crate::modules::rmf::{read_redistribution_matrix, RedistributionMatrix};
use crate::modules::spectrum::{read_spectrum, Background, Spectrum};
use crate::modules::table::CalibrationSource;
use crate::numerics::{rebin_integrated, Grid, GridUnit};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Source model evaluated on a grid, returning bin-integrated flux per bin.
///
/// The engine must not be re-entered from inside `evaluate`.
pub trait ModelEvaluator {
    fn evaluate(&mut self, grid: &Grid) -> Vec<f64>;
}

impl<F> ModelEvaluator for F
where
    F: FnMut(&Grid) -> Vec<f64>,
{
    fn evaluate(&mut self, grid: &Grid) -> Vec<f64> {
        self(grid)
    }
}

/// External fit statistic over the noticed bins of every fitted spectrum.
pub trait FitStatistic {
    fn evaluate(&self, data: &[f64], model: &[f64], uncertainty: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FitSpan {
    pub spectrum: SpectrumId,
    pub start: usize,
    pub len: usize,
}

/// Noticed bins of several spectra laid end to end.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FitArrays {
    pub data: Vec<f64>,
    /// Predicted counts plus scaled background.
    pub model: Vec<f64>,
    pub uncertainty: Vec<f64>,
    pub spans: Vec<FitSpan>,
}

#[derive(Debug)]
struct SpectrumRecord {
    spectrum: Spectrum,
    assigned: Vec<ResponsePair>,
    fit: Vec<ResponsePair>,
}

impl SpectrumRecord {
    fn matrix_refs(&self, rmf: RmfId) -> usize {
        self.assigned
            .iter()
            .chain(&self.fit)
            .filter(|pair| pair.rmf == rmf)
            .count()
    }
}

#[derive(Debug)]
pub struct Session {
    config: EngineConfig,
    arfs: Arena<ArfId, EffectiveArea>,
    rmfs: Arena<RmfId, RedistributionMatrix>,
    spectra: Arena<SpectrumId, SpectrumRecord>,
    strategy: Box<dyn EvalGridStrategy>,
    eval_cache: EvalGridCache,
}

impl Session {
    pub fn new(config: EngineConfig) -> XrespResult<Self> {
        let strategy = strategy_from_config(&config.eval_grid)?;
        Ok(Self {
            config,
            arfs: Arena::default(),
            rmfs: Arena::default(),
            spectra: Arena::default(),
            strategy,
            eval_cache: EvalGridCache::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the configuration and re-derives every spectrum's fit pairs.
    pub fn set_config(&mut self, config: EngineConfig) -> XrespResult<()> {
        self.strategy = strategy_from_config(&config.eval_grid)?;
        self.config = config;
        self.eval_cache.invalidate();
        for id in self.spectra.ids() {
            self.spectra.get_mut(id)?.spectrum.configure(&self.config)?;
            self.refresh_fit_pairs(id)?;
        }
        Ok(())
    }

    pub fn load_arf(&mut self, source: &dyn CalibrationSource) -> XrespResult<ArfId> {
        let arf = read_effective_area(source, &self.config.arf_extension_candidates())?;
        Ok(self.add_arf(arf))
    }

    pub fn add_arf(&mut self, arf: EffectiveArea) -> ArfId {
        self.arfs.insert(arf, true)
    }

    pub fn arf(&self, id: ArfId) -> XrespResult<&EffectiveArea> {
        self.arfs.get(id)
    }

    pub fn arf_in_use(&self, id: ArfId) -> XrespResult<usize> {
        self.arfs.in_use(id)
    }

    pub fn put_arf(&mut self, id: ArfId, update: AreaUpdate<'_>) -> XrespResult<PutReport> {
        let report = self.arfs.get_mut(id)?.put(
            update,
            self.config.grid_match_tolerance,
            self.config.default_uncertainty,
        )?;
        self.eval_cache.invalidate();
        Ok(report)
    }

    pub fn set_arf_exposure(&mut self, id: ArfId, exposure: f64) -> XrespResult<()> {
        self.arfs.get_mut(id)?.set_exposure(exposure)
    }

    /// Deletes an unused effective area immediately.
    pub fn delete_arf(&mut self, id: ArfId) -> XrespResult<EffectiveArea> {
        self.arfs.remove(id)
    }

    /// Drops the session's own hold; the curve goes once no spectrum uses it.
    pub fn release_arf(&mut self, id: ArfId) -> XrespResult<()> {
        self.arfs.set_retained(id, false)?;
        self.compact();
        Ok(())
    }

    pub fn load_rmf(&mut self, source: &dyn CalibrationSource) -> XrespResult<RmfId> {
        let rmf = read_redistribution_matrix(source)?;
        Ok(self.add_rmf(rmf))
    }

    pub fn add_rmf(&mut self, rmf: RedistributionMatrix) -> RmfId {
        self.rmfs.insert(rmf, true)
    }

    pub fn rmf(&self, id: RmfId) -> XrespResult<&RedistributionMatrix> {
        self.rmfs.get(id)
    }

    pub fn rmf_in_use(&self, id: RmfId) -> XrespResult<usize> {
        self.rmfs.in_use(id)
    }

    pub fn delete_rmf(&mut self, id: RmfId) -> XrespResult<RedistributionMatrix> {
        self.rmfs.remove(id)
    }

    pub fn release_rmf(&mut self, id: RmfId) -> XrespResult<()> {
        self.rmfs.set_retained(id, false)?;
        self.compact();
        Ok(())
    }

    /// Rebins a matrix's channel axis; rejected while more than one
    /// spectrum uses the matrix.
    pub fn rebin_matrix(&mut self, id: RmfId, target: &Grid, threshold: f64) -> XrespResult<bool> {
        let sharers = self.matrix_sharers(id);
        if sharers > 1 {
            return Err(XrespError::shared_in_use(
                "RMF.REBIN_SHARED",
                format!("{id} is used by {sharers} spectra and cannot be rebinned"),
            ));
        }
        self.rmfs.get_mut(id)?.rebin_channels(target, threshold)
    }

    pub fn add_spectrum(&mut self, mut spectrum: Spectrum) -> XrespResult<SpectrumId> {
        spectrum.configure(&self.config)?;
        let id = self.spectra.insert(
            SpectrumRecord {
                spectrum,
                assigned: Vec::new(),
                fit: Vec::new(),
            },
            true,
        );
        self.refresh_fit_pairs(id)?;
        Ok(id)
    }

    pub fn load_spectrum(&mut self, source: &dyn CalibrationSource) -> XrespResult<SpectrumId> {
        let spectrum = read_spectrum(source)?;
        self.add_spectrum(spectrum)
    }

    pub fn spectrum(&self, id: SpectrumId) -> XrespResult<&Spectrum> {
        self.spectra.get(id).map(|record| &record.spectrum)
    }

    pub fn spectrum_ids(&self) -> Vec<SpectrumId> {
        self.spectra.ids()
    }

    /// Removes a spectrum and releases every response it held.
    pub fn delete_spectrum(&mut self, id: SpectrumId) -> XrespResult<Spectrum> {
        let (assigned, fit) = {
            let record = self.spectra.get_mut(id)?;
            (
                std::mem::take(&mut record.assigned),
                std::mem::take(&mut record.fit),
            )
        };
        self.release_pairs(&assigned)?;
        self.release_pairs(&fit)?;
        let record = self.spectra.remove(id)?;
        self.compact();
        self.eval_cache.invalidate();
        Ok(record.spectrum)
    }

    pub fn responses(&self, id: SpectrumId) -> XrespResult<&[ResponsePair]> {
        self.spectra.get(id).map(|record| record.assigned.as_slice())
    }

    pub fn fit_responses(&self, id: SpectrumId) -> XrespResult<&[ResponsePair]> {
        self.spectra.get(id).map(|record| record.fit.as_slice())
    }

    /// Attaches one more response pair to a spectrum.
    pub fn assign_response(&mut self, id: SpectrumId, pair: ResponsePair) -> XrespResult<()> {
        let arf = self.arfs.get(pair.arf)?;
        let rmf = self.rmfs.get(pair.rmf)?;
        let spectrum = &self.spectra.get(id)?.spectrum;

        if arf.len() != rmf.num_energy_bins() {
            return Err(XrespError::size_mismatch(
                "RESPONSE.ARF_RMF",
                &format!("{} bins vs {} energy bins", pair.arf, pair.rmf),
                rmf.num_energy_bins(),
                arf.len(),
            ));
        }
        if !arf
            .grid()
            .matches(rmf.energy_grid(), self.config.grid_match_tolerance)
        {
            warn!(
                arf = %pair.arf,
                rmf = %pair.rmf,
                tolerance = self.config.grid_match_tolerance,
                "effective area and matrix energy grids differ"
            );
        }
        let channels = rmf.original_channel_grid().len();
        if channels != spectrum.num_original_bins() {
            return Err(XrespError::size_mismatch(
                "RESPONSE.CHANNELS",
                &format!("{} channels vs {id} bins", pair.rmf),
                spectrum.num_original_bins(),
                channels,
            ));
        }

        self.arfs.acquire(pair.arf)?;
        self.rmfs.acquire(pair.rmf)?;
        self.spectra.get_mut(id)?.assigned.push(pair);
        debug!(spectrum = %id, arf = %pair.arf, rmf = %pair.rmf, "response assigned");
        self.restore_shared_matrix(pair.rmf)?;
        self.refresh_fit_pairs(id)
    }

    /// Number of spectra holding a reference on `rmf`.
    fn matrix_sharers(&self, rmf: RmfId) -> usize {
        self.spectra
            .iter()
            .filter(|(_, record)| record.matrix_refs(rmf) > 0)
            .count()
    }

    /// A matrix rebinned for one spectrum goes back to its original channels
    /// once a second spectrum uses it.
    fn restore_shared_matrix(&mut self, rmf: RmfId) -> XrespResult<()> {
        let sharers = self.matrix_sharers(rmf);
        let matrix = self.rmfs.get_mut(rmf)?;
        if sharers < 2 || !matrix.is_rebinned() {
            return Ok(());
        }
        let original = matrix.original_channel_grid().clone();
        matrix.rebin_channels(&original, self.config.matrix_rebin_threshold)?;
        self.eval_cache.invalidate();
        debug!(rmf = %rmf, sharers, "shared matrix restored to its original channels");
        Ok(())
    }

    pub fn unassign_responses(&mut self, id: SpectrumId) -> XrespResult<()> {
        let assigned = std::mem::take(&mut self.spectra.get_mut(id)?.assigned);
        self.release_pairs(&assigned)?;
        self.refresh_fit_pairs(id)
    }

    pub fn set_kernel(&mut self, id: SpectrumId, kernel: Box<dyn ResponseKernel>) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.set_kernel(kernel);
        Ok(())
    }

    pub fn set_background(&mut self, id: SpectrumId, background: Background) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.set_background(background)
    }

    pub fn set_sys_err(&mut self, id: SpectrumId, fractions: Vec<f64>) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.set_sys_err(fractions)
    }

    pub fn notice_range(&mut self, id: SpectrumId, lo: f64, hi: f64, unit: GridUnit) -> XrespResult<usize> {
        self.spectra.get_mut(id)?.spectrum.notice_range(lo, hi, unit)
    }

    pub fn ignore_range(&mut self, id: SpectrumId, lo: f64, hi: f64, unit: GridUnit) -> XrespResult<usize> {
        self.spectra.get_mut(id)?.spectrum.ignore_range(lo, hi, unit)
    }

    pub fn notice_all(&mut self, id: SpectrumId) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.notice_all()
    }

    pub fn ignore_all(&mut self, id: SpectrumId) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.ignore_all()
    }

    /// Groups a spectrum with an alternating-sign mask and brings its
    /// unshared matrices onto the new channel axis.
    pub fn rebin_spectrum(&mut self, id: SpectrumId, mask: &[i32]) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.rebin(mask)?;
        self.sync_matrices(id)
    }

    pub fn group_min_counts(&mut self, id: SpectrumId, threshold: f64) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.group_min_counts(threshold)?;
        self.sync_matrices(id)
    }

    pub fn unbin(&mut self, id: SpectrumId) -> XrespResult<()> {
        self.spectra.get_mut(id)?.spectrum.unbin()?;
        self.sync_matrices(id)
    }

    /// Energy-bin notice masks, one per fit pair, derived from the spectrum's
    /// noticed channels.
    pub fn noticed_model_bins(&self, id: SpectrumId) -> XrespResult<Vec<Vec<bool>>> {
        let record = self.spectra.get(id)?;
        let spectrum = &record.spectrum;
        let map = spectrum.rebin_map();
        record
            .fit
            .iter()
            .map(|pair| {
                let rmf = self.rmfs.get(pair.rmf)?;
                let channel_notice: Vec<bool> = if rmf.num_channels() == spectrum.num_bins() {
                    spectrum.notice().to_vec()
                } else {
                    spectrum
                        .orig_notice()
                        .iter()
                        .enumerate()
                        .map(|(index, noticed)| *noticed && map.includes(index))
                        .collect()
                };
                rmf.noticed_model_bins(&channel_notice)
            })
            .collect()
    }

    /// Predicted counts per working bin for each of `ids`, summed over the
    /// spectrum's fit pairs.
    pub fn predicted_counts(
        &mut self,
        ids: &[SpectrumId],
        model: &mut dyn ModelEvaluator,
    ) -> XrespResult<Vec<Vec<f64>>> {
        let mut members = Vec::new();
        for id in ids {
            for pair in &self.spectra.get(*id)?.fit {
                members.push((*id, pair.arf));
            }
        }
        let mut arf_ids: Vec<ArfId> = members.iter().map(|(_, arf)| *arf).collect();
        arf_ids.sort();
        arf_ids.dedup();

        let mut grids = Vec::with_capacity(arf_ids.len());
        for arf in &arf_ids {
            grids.push(self.arfs.get(*arf)?.grid());
        }
        let shared = self
            .eval_cache
            .get_or_build(EvalGridKey::new(members), self.strategy.as_ref(), &grids)?;

        let mut fluxes: BTreeMap<ArfId, Vec<f64>> = BTreeMap::new();
        match shared {
            Some(shared) => {
                let values = evaluate_model(model, shared)?;
                for (arf, grid) in arf_ids.iter().zip(&grids) {
                    fluxes.insert(*arf, rebin_integrated(grid, shared, &values)?);
                }
            }
            None => {
                for (arf, grid) in arf_ids.iter().zip(&grids) {
                    fluxes.insert(*arf, evaluate_model(model, grid)?);
                }
            }
        }

        let mut predicted = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.spectra.get(*id)?;
            let spectrum = &record.spectrum;
            let mut working = vec![0.0; spectrum.num_bins()];
            for pair in &record.fit {
                let arf = self.arfs.get(pair.arf)?;
                let rmf = self.rmfs.get(pair.rmf)?;
                let flux = fluxes.get(&pair.arf).ok_or_else(|| {
                    XrespError::internal("MODEL.MISSING_FLUX", format!("no model flux for {}", pair.arf))
                })?;
                let mut channels = vec![0.0; rmf.num_channels()];
                spectrum.kernel().fold(arf, rmf, flux, &mut channels)?;
                for (slot, value) in working.iter_mut().zip(to_working(spectrum, channels)?) {
                    *slot += value;
                }
            }
            predicted.push(working);
        }
        Ok(predicted)
    }

    /// Noticed data, model plus scaled background and uncertainty.
    pub fn fit_arrays(
        &mut self,
        ids: &[SpectrumId],
        model: &mut dyn ModelEvaluator,
    ) -> XrespResult<FitArrays> {
        let predicted = self.predicted_counts(ids, model)?;
        let mut arrays = FitArrays::default();

        for (id, counts) in ids.iter().zip(predicted) {
            let spectrum = self.spectrum(*id)?;
            let background = spectrum.scaled_background()?;
            let uncertainty = spectrum.fit_uncertainty()?;
            let start = arrays.data.len();
            for index in 0..spectrum.num_bins() {
                if !spectrum.notice()[index] {
                    continue;
                }
                arrays.data.push(spectrum.counts()[index]);
                arrays.model.push(counts[index] + background[index]);
                arrays.uncertainty.push(uncertainty[index]);
            }
            arrays.spans.push(FitSpan {
                spectrum: *id,
                start,
                len: arrays.data.len() - start,
            });
        }
        Ok(arrays)
    }

    pub fn evaluate_statistic(
        &mut self,
        ids: &[SpectrumId],
        model: &mut dyn ModelEvaluator,
        statistic: &dyn FitStatistic,
    ) -> XrespResult<f64> {
        let arrays = self.fit_arrays(ids, model)?;
        Ok(statistic.evaluate(&arrays.data, &arrays.model, &arrays.uncertainty))
    }

    /// Flux-corrected spectrum using the weights of every fit pair.
    pub fn flux_correct(&self, id: SpectrumId) -> XrespResult<FluxSpectrum> {
        let record = self.spectra.get(id)?;
        let spectrum = &record.spectrum;
        let mut total: Option<Vec<f64>> = None;
        for pair in &record.fit {
            let arf = self.arfs.get(pair.arf)?;
            let rmf = self.rmfs.get(pair.rmf)?;
            let weights = unit_source_weights(spectrum.kernel(), arf, rmf)?;
            total = Some(match total {
                None => weights,
                Some(sum) if sum.len() == weights.len() => {
                    sum.iter().zip(&weights).map(|(a, b)| a + b).collect()
                }
                Some(sum) => {
                    return Err(XrespError::size_mismatch(
                        "FLUX.PAIR_CHANNELS",
                        "response pair channel counts",
                        sum.len(),
                        weights.len(),
                    ));
                }
            });
        }
        let weights = total.ok_or_else(|| {
            XrespError::internal("FLUX.NO_RESPONSE", format!("{id} has no fit response"))
        })?;
        flux_correct(spectrum, &weights)
    }

    /// Frees unused, unretained calibration products.
    pub fn compact(&mut self) -> usize {
        let freed = self.arfs.compact() + self.rmfs.compact();
        if freed > 0 {
            debug!(freed, "released unused calibration products");
        }
        freed
    }

    fn release_pairs(&mut self, pairs: &[ResponsePair]) -> XrespResult<()> {
        for pair in pairs {
            self.arfs.release(pair.arf)?;
            self.rmfs.release(pair.rmf)?;
        }
        Ok(())
    }

    fn refresh_fit_pairs(&mut self, id: SpectrumId) -> XrespResult<()> {
        let (assigned, orig_grid) = {
            let record = self.spectra.get(id)?;
            (record.assigned.clone(), record.spectrum.orig_grid().clone())
        };

        let mut fit = Vec::with_capacity(assigned.len().max(1));
        if assigned.is_empty() {
            let arf = self.arfs.insert(EffectiveArea::identity(&orig_grid), false);
            let rmf = self
                .rmfs
                .insert(RedistributionMatrix::delta(&orig_grid, &orig_grid)?, false);
            fit.push(ResponsePair::new(arf, rmf));
        }
        for pair in &assigned {
            let arf = if self.config.use_ideal_arf {
                let exposure = self.arfs.get(pair.arf)?.exposure();
                let mut ideal = EffectiveArea::identity(self.rmfs.get(pair.rmf)?.energy_grid());
                ideal.set_exposure(exposure)?;
                self.arfs.insert(ideal, false)
            } else {
                pair.arf
            };
            let rmf = if self.config.use_ideal_rmf {
                let energy_grid = self.arfs.get(arf)?.grid().clone();
                self.rmfs
                    .insert(RedistributionMatrix::delta(&energy_grid, &orig_grid)?, false)
            } else {
                pair.rmf
            };
            fit.push(ResponsePair::new(arf, rmf));
        }

        self.acquire_pairs(&fit)?;
        let previous = std::mem::replace(&mut self.spectra.get_mut(id)?.fit, fit);
        self.release_pairs(&previous)?;
        self.compact();
        self.eval_cache.invalidate();
        self.sync_matrices(id)
    }

    fn acquire_pairs(&mut self, pairs: &[ResponsePair]) -> XrespResult<()> {
        for pair in pairs {
            self.arfs.acquire(pair.arf)?;
            self.rmfs.acquire(pair.rmf)?;
        }
        Ok(())
    }

    /// Puts every matrix used only by this spectrum on its working channel
    /// axis.
    fn sync_matrices(&mut self, id: SpectrumId) -> XrespResult<()> {
        if !self.config.rebin_matrix_with_data {
            return Ok(());
        }

        let record = self.spectra.get(id)?;
        let map = record.spectrum.rebin_map().clone();
        let mut rmf_ids: Vec<RmfId> = record
            .assigned
            .iter()
            .chain(&record.fit)
            .map(|pair| pair.rmf)
            .collect();
        rmf_ids.sort();
        rmf_ids.dedup();
        let own: Vec<usize> = rmf_ids.iter().map(|rmf| record.matrix_refs(*rmf)).collect();

        for (rmf_id, own) in rmf_ids.into_iter().zip(own) {
            let in_use = self.rmfs.in_use(rmf_id)?;
            if in_use != own {
                warn!(
                    spectrum = %id,
                    rmf = %rmf_id,
                    in_use,
                    own,
                    "matrix is shared with other spectra; left on its current channel axis"
                );
                continue;
            }

            let matrix = self.rmfs.get_mut(rmf_id)?;
            let original = matrix.original_channel_grid().clone();
            if original.len() != map.original_len() {
                debug!(rmf = %rmf_id, "matrix channels do not follow the spectrum bins");
                continue;
            }
            let target = map.grid(&original)?;
            if matrix.rebin_channels(&target, self.config.matrix_rebin_threshold)? {
                self.eval_cache.invalidate();
            }
        }
        Ok(())
    }
}

fn evaluate_model(model: &mut dyn ModelEvaluator, grid: &Grid) -> XrespResult<Vec<f64>> {
    let values = model.evaluate(grid);
    if values.len() != grid.len() {
        return Err(XrespError::size_mismatch(
            "MODEL.LENGTH",
            "model values vs evaluation grid",
            grid.len(),
            values.len(),
        ));
    }
    Ok(values)
}

/// Maps per-channel values onto the working bins of `spectrum`.
fn to_working(spectrum: &Spectrum, channels: Vec<f64>) -> XrespResult<Vec<f64>> {
    if channels.len() == spectrum.num_bins() {
        Ok(channels)
    } else if channels.len() == spectrum.num_original_bins() {
        spectrum.rebin_map().sum(&channels)
    } else {
        Err(XrespError::size_mismatch(
            "RESPONSE.CHANNELS",
            "matrix channels vs spectrum bins",
            spectrum.num_bins(),
            channels.len(),
        ))
    }
}
