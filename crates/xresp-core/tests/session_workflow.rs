use approx::assert_relative_eq;
use std::fs;
use tempfile::TempDir;
use xresp_core::common::config::{load_engine_config, EngineConfig, EvalGridConfig};
use xresp_core::domain::{BinValues, ResponsePair, SpectrumId, XrespErrorCategory};
use xresp_core::modules::kernel::AuxiliaryKernel;
use xresp_core::modules::spectrum::{read_spectrum, Background};
use xresp_core::modules::table::load_calibration_file;
use xresp_core::{FitStatistic, Session};
use xresp_core::numerics::Grid;

fn workspace_root() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn fixture(name: &str) -> std::path::PathBuf {
    workspace_root().join("fixtures").join(name)
}

fn flat_density(density: f64) -> impl FnMut(&Grid) -> Vec<f64> {
    move |grid: &Grid| (0..grid.len()).map(|index| density * grid.width(index)).collect()
}

fn loaded_session(config: EngineConfig) -> (Session, SpectrumId, ResponsePair) {
    let mut session = Session::new(config).expect("session should build");
    let spectrum = load_calibration_file(fixture("spectrum.json")).expect("spectrum fixture");
    let id = session.load_spectrum(&spectrum).expect("spectrum should load");
    let arf = session
        .load_arf(&load_calibration_file(fixture("arf.json")).expect("arf fixture"))
        .expect("arf should load");
    let rmf = session
        .load_rmf(&load_calibration_file(fixture("rmf.json")).expect("rmf fixture"))
        .expect("rmf should load");
    let pair = ResponsePair::new(arf, rmf);
    session.assign_response(id, pair).expect("response should attach");
    (session, id, pair)
}

struct ChiSquare;

impl FitStatistic for ChiSquare {
    fn evaluate(&self, data: &[f64], model: &[f64], uncertainty: &[f64]) -> f64 {
        data.iter()
            .zip(model)
            .zip(uncertainty)
            .map(|((d, m), s)| ((d - m) / s).powi(2))
            .sum()
    }
}

#[test]
fn fixture_responses_fold_a_flat_source() {
    let (mut session, id, _) = loaded_session(EngineConfig::default());
    let predicted = session
        .predicted_counts(&[id], &mut flat_density(0.001))
        .expect("fold should succeed");
    let expected = [140.0, 200.0, 180.0, 80.0];
    for (value, expected) in predicted[0].iter().zip(expected) {
        assert_relative_eq!(*value, expected, epsilon = 1.0e-9);
    }

    let statistic = session
        .evaluate_statistic(&[id], &mut flat_density(0.001), &ChiSquare)
        .expect("statistic should evaluate");
    assert!(statistic < 1.0e-12, "model equals data, got {statistic}");
}

#[test]
fn grouping_rebins_the_matrix_and_unbinning_restores_it() {
    let (mut session, id, pair) = loaded_session(EngineConfig::default());
    session.rebin_spectrum(id, &[1, 1, -1, -1]).expect("rebin should succeed");
    assert_eq!(session.rmf(pair.rmf).unwrap().num_channels(), 2);
    assert_eq!(session.spectrum(id).unwrap().counts(), &[340.0, 260.0]);

    let predicted = session.predicted_counts(&[id], &mut flat_density(0.001)).unwrap();
    assert_relative_eq!(predicted[0][0], 340.0, epsilon = 1.0e-9);
    assert_relative_eq!(predicted[0][1], 260.0, epsilon = 1.0e-9);

    session.unbin(id).unwrap();
    let matrix = session.rmf(pair.rmf).unwrap();
    assert_eq!(matrix.num_channels(), 4);
    assert!(!matrix.is_rebinned());
}

#[test]
fn minimum_count_grouping_keeps_totals() {
    let (mut session, id, _) = loaded_session(EngineConfig::default());
    session.group_min_counts(id, 300.0).unwrap();
    let spectrum = session.spectrum(id).unwrap();
    assert!(spectrum.num_bins() < 4);
    assert_relative_eq!(spectrum.counts().iter().sum::<f64>(), 600.0);
    assert!(spectrum.counts().iter().all(|counts| *counts >= 260.0));
}

#[test]
fn flux_correction_divides_out_the_response() {
    let (session, id, _) = loaded_session(EngineConfig::default());
    let corrected = session.flux_correct(id).unwrap();
    assert_relative_eq!(corrected.weights[0], 140_000.0, epsilon = 1.0e-6);
    for flux in &corrected.flux {
        assert_relative_eq!(*flux, 0.001, epsilon = 1.0e-12);
    }
}

#[test]
fn background_is_scaled_and_subtracted_in_flux() {
    let (mut session, id, _) = loaded_session(EngineConfig::default());
    let background_file = load_calibration_file(fixture("background.json")).unwrap();
    let background = Background::from_spectrum(&read_spectrum(&background_file).unwrap()).unwrap();
    session.set_background(id, background).unwrap();

    let spectrum = session.spectrum(id).unwrap();
    assert_relative_eq!(spectrum.background_scale(), 0.125);
    assert_eq!(spectrum.scaled_background().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);

    let corrected = session.flux_correct(id).unwrap();
    let net = [138.0, 196.0, 174.0, 72.0];
    for index in 0..4 {
        assert_relative_eq!(corrected.flux[index] * corrected.weights[index], net[index], epsilon = 1.0e-9);
    }
}

#[test]
fn grouped_flux_round_trips_to_net_counts() {
    let (mut session, id, _) = loaded_session(EngineConfig::default());
    let background_file = load_calibration_file(fixture("background.json")).unwrap();
    let background = Background::from_spectrum(&read_spectrum(&background_file).unwrap()).unwrap();
    session.set_background(id, background).unwrap();
    session.rebin_spectrum(id, &[1, 1, -1, -1]).unwrap();

    let corrected = session.flux_correct(id).unwrap();
    let net = [334.0, 246.0];
    assert_eq!(corrected.flux.len(), 2);
    for index in 0..2 {
        assert_relative_eq!(corrected.flux[index] * corrected.weights[index], net[index], epsilon = 1.0e-9);
    }
}

#[test]
fn auxiliary_kernel_applies_its_transmission() {
    let (mut session, id, _) = loaded_session(EngineConfig::default());
    let kernel = AuxiliaryKernel::new(BinValues::Scalar(0.5)).unwrap();
    session.set_kernel(id, Box::new(kernel)).unwrap();
    let predicted = session.predicted_counts(&[id], &mut flat_density(0.001)).unwrap();
    assert_relative_eq!(predicted[0].iter().sum::<f64>(), 300.0, epsilon = 1.0e-9);
    let corrected = session.flux_correct(id).unwrap();
    assert_relative_eq!(corrected.flux[0], 0.002, epsilon = 1.0e-12);
}

#[test]
fn merged_grid_config_shares_one_model_evaluation() {
    let temp = TempDir::new().expect("tempdir should be created");
    let path = temp.path().join("engine.json");
    fs::copy(fixture("engine.json"), &path).unwrap();
    let config = load_engine_config(&path).expect("config should parse");
    assert_eq!(config.eval_grid, EvalGridConfig::Merged);

    let (mut session, first, pair) = loaded_session(config);
    let spectrum = load_calibration_file(fixture("spectrum.json")).unwrap();
    let second = session.load_spectrum(&spectrum).unwrap();
    session.assign_response(second, pair).unwrap();
    assert_eq!(session.rmf_in_use(pair.rmf).unwrap(), 4);

    let mut calls = 0;
    let mut model = |grid: &Grid| {
        calls += 1;
        (0..grid.len()).map(|index| 0.001 * grid.width(index)).collect::<Vec<_>>()
    };
    let predicted = session.predicted_counts(&[first, second], &mut model).unwrap();
    assert_eq!(calls, 1);
    assert_eq!(predicted.len(), 2);
    assert_relative_eq!(predicted[1].iter().sum::<f64>(), 600.0, epsilon = 1.0e-9);

    // Shared matrices stay on the original channels.
    session.rebin_spectrum(first, &[1, 1, -1, -1]).unwrap();
    assert_eq!(session.rmf(pair.rmf).unwrap().num_channels(), 4);
    let target = session.spectrum(first).unwrap().grid().clone();
    let error = session.rebin_matrix(pair.rmf, &target, 0.0).unwrap_err();
    assert_eq!(error.category(), XrespErrorCategory::SharedResourceInUse);
}

#[test]
fn ideal_rmf_bypasses_redistribution() {
    let config = EngineConfig {
        use_ideal_rmf: true,
        ..EngineConfig::default()
    };
    let (mut session, id, pair) = loaded_session(config);
    let fit = session.fit_responses(id).unwrap()[0];
    assert_eq!(fit.arf, pair.arf);
    assert_ne!(fit.rmf, pair.rmf);
    let predicted = session.predicted_counts(&[id], &mut flat_density(0.001)).unwrap();
    let expected = [100.0, 200.0, 200.0, 100.0];
    for (value, expected) in predicted[0].iter().zip(expected) {
        assert_relative_eq!(*value, expected, epsilon = 1.0e-9);
    }
}
