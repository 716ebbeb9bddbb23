use super::CliError;
use super::helpers::*;
use serde::Serialize;
use std::path::PathBuf;
use xresp_core::common::config::EngineConfig;
use xresp_core::domain::XrespError;
use xresp_core::modules::rmf::{read_redistribution_matrix, MatrixSummary};
use xresp_core::modules::table::load_calibration_file;
use xresp_core::numerics::GridUnit;

#[derive(clap::Args)]
pub(super) struct FoldArgs {
    #[command(flatten)]
    input: SpectrumInputArgs,

    /// Flat model flux density per keV
    #[arg(long, conflicts_with = "model_table")]
    flat: Option<f64>,

    /// Model table with lo hi flux columns (bin-integrated flux)
    #[arg(long)]
    model_table: Option<PathBuf>,

    /// Unit of the model table edges
    #[arg(long, default_value = "kev")]
    model_unit: GridUnit,

    /// Write JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct RebinArgs {
    #[command(flatten)]
    input: SpectrumInputArgs,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct FluxArgs {
    #[command(flatten)]
    input: SpectrumInputArgs,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct InspectRmfArgs {
    /// Redistribution-matrix table
    rmf: PathBuf,

    /// Also print the dense response of these energy rows
    #[arg(long)]
    row: Vec<usize>,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FoldReport {
    lo: Vec<f64>,
    hi: Vec<f64>,
    notice: Vec<bool>,
    counts: Vec<f64>,
    predicted: Vec<f64>,
    background: Vec<f64>,
    uncertainty: Vec<f64>,
    responses: usize,
}

#[derive(Debug, Serialize)]
struct RebinReport {
    lo: Vec<f64>,
    hi: Vec<f64>,
    counts: Vec<f64>,
    stat_err: Vec<f64>,
    notice: Vec<bool>,
    mask: Vec<i32>,
    original_bins: usize,
    matrices: Vec<MatrixSummary>,
}

#[derive(Debug, Serialize)]
struct MatrixRow {
    row: usize,
    energy_lo: f64,
    energy_hi: f64,
    weights: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    summary: MatrixSummary,
    rows: Vec<MatrixRow>,
}

pub(super) fn run_fold_command(args: FoldArgs, config: EngineConfig) -> Result<i32, CliError> {
    let mut model = match (args.flat, &args.model_table) {
        (Some(density), _) => CliModel::Flat(density),
        (None, Some(path)) => CliModel::from_table(path, args.model_unit)?,
        (None, None) => {
            return Err(CliError::Usage(
                "fold needs a model: pass --flat or --model-table".to_string(),
            ));
        }
    };

    let (mut session, id) = prepare_session(&args.input, config)?;
    let predicted = session
        .predicted_counts(&[id], &mut model)?
        .pop()
        .unwrap_or_default();
    let spectrum = session.spectrum(id)?;
    let report = FoldReport {
        lo: spectrum.grid().lo().to_vec(),
        hi: spectrum.grid().hi().to_vec(),
        notice: spectrum.notice().to_vec(),
        counts: spectrum.counts().to_vec(),
        predicted,
        background: spectrum.scaled_background()?,
        uncertainty: spectrum.fit_uncertainty()?,
        responses: session.responses(id)?.len(),
    };
    write_json(&report, args.output.as_deref())?;
    Ok(0)
}

pub(super) fn run_rebin_command(args: RebinArgs, config: EngineConfig) -> Result<i32, CliError> {
    let (session, id) = prepare_session(&args.input, config)?;
    let spectrum = session.spectrum(id)?;
    let matrices = session
        .responses(id)?
        .iter()
        .map(|pair| session.rmf(pair.rmf).map(|rmf| rmf.summary()))
        .collect::<Result<Vec<_>, XrespError>>()?;
    let report = RebinReport {
        lo: spectrum.grid().lo().to_vec(),
        hi: spectrum.grid().hi().to_vec(),
        counts: spectrum.counts().to_vec(),
        stat_err: spectrum.stat_err().to_vec(),
        notice: spectrum.notice().to_vec(),
        mask: spectrum.rebin_mask().to_vec(),
        original_bins: spectrum.num_original_bins(),
        matrices,
    };
    write_json(&report, args.output.as_deref())?;
    Ok(0)
}

pub(super) fn run_flux_command(args: FluxArgs, config: EngineConfig) -> Result<i32, CliError> {
    let (session, id) = prepare_session(&args.input, config)?;
    let corrected = session.flux_correct(id)?;
    write_json(&corrected, args.output.as_deref())?;
    Ok(0)
}

pub(super) fn run_inspect_rmf_command(
    args: InspectRmfArgs,
    _config: EngineConfig,
) -> Result<i32, CliError> {
    let matrix = read_redistribution_matrix(&load_calibration_file(&args.rmf)?)?;
    let mut rows = Vec::with_capacity(args.row.len());
    for row in args.row {
        if row >= matrix.num_energy_bins() {
            return Err(CliError::Compute(XrespError::input_validation(
                "INPUT.CLI_ROW",
                format!(
                    "row {row} is outside the {} energy rows of '{}'",
                    matrix.num_energy_bins(),
                    args.rmf.display()
                ),
            )));
        }
        rows.push(MatrixRow {
            row,
            energy_lo: matrix.energy_grid().lo()[row],
            energy_hi: matrix.energy_grid().hi()[row],
            weights: matrix.dense_row(row),
        });
    }
    let report = InspectReport {
        summary: matrix.summary(),
        rows,
    };
    write_json(&report, args.output.as_deref())?;
    Ok(0)
}
