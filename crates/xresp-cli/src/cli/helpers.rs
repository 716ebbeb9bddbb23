use super::CliError;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xresp_core::common::config::{load_engine_config, EngineConfig};
use xresp_core::domain::{ResponsePair, SpectrumId, XrespError};
use xresp_core::modules::spectrum::{parse_ascii_spectrum, read_spectrum, Background, Spectrum};
use xresp_core::modules::table::{load_calibration_file, parse_ascii_columns};
use xresp_core::{ModelEvaluator, Session};
use xresp_core::numerics::{canonicalize, rebin_integrated, Grid, GridUnit};

pub(super) fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    // A second call in the same process keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(super) fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => Ok(load_engine_config(path).context("engine configuration")?),
        None => Ok(EngineConfig::default()),
    }
}

/// Reads a spectrum from a JSON table, or from whitespace columns in `unit`.
pub(super) fn load_spectrum(path: &Path, unit: GridUnit) -> Result<Spectrum, CliError> {
    if is_json(path) {
        let table = load_calibration_file(path)?;
        return Ok(read_spectrum(&table)?);
    }
    let text = fs::read_to_string(path).map_err(|source| {
        XrespError::io_system(
            "IO.CLI_SPECTRUM",
            format!("failed to read spectrum '{}': {}", path.display(), source),
        )
    })?;
    Ok(parse_ascii_spectrum(&path.display().to_string(), &text, unit)?)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

/// Calibration inputs shared by the spectrum commands.
#[derive(clap::Args, Debug, Clone)]
pub(super) struct SpectrumInputArgs {
    /// Spectrum as a JSON table or whitespace columns (lo hi counts [err])
    #[arg(long)]
    pub(super) spectrum: std::path::PathBuf,

    /// Unit of the bin edges in a column spectrum
    #[arg(long, default_value = "kev")]
    pub(super) unit: GridUnit,

    /// Effective-area table; repeat together with --rmf for several responses
    #[arg(long)]
    pub(super) arf: Vec<std::path::PathBuf>,

    /// Redistribution-matrix table, paired with --arf in order
    #[arg(long)]
    pub(super) rmf: Vec<std::path::PathBuf>,

    /// Background spectrum, scaled by its exposure and BACKSCAL
    #[arg(long)]
    pub(super) background: Option<std::path::PathBuf>,

    /// Ignore everything outside LO HI (in --unit)
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
    pub(super) notice: Option<Vec<f64>>,

    /// Grouping flags, comma separated (1 starts a bin, -1 continues, 0 excludes)
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, conflicts_with = "min_counts")]
    pub(super) mask: Option<Vec<i32>>,

    /// Group noticed bins until each holds at least this many counts
    #[arg(long)]
    pub(super) min_counts: Option<f64>,
}

pub(super) fn prepare_session(
    args: &SpectrumInputArgs,
    config: EngineConfig,
) -> Result<(Session, SpectrumId), CliError> {
    if args.arf.len() != args.rmf.len() {
        return Err(CliError::Usage(format!(
            "--arf and --rmf must be given the same number of times ({} vs {})",
            args.arf.len(),
            args.rmf.len()
        )));
    }

    let mut session = Session::new(config)?;
    let spectrum = load_spectrum(&args.spectrum, args.unit)?;
    let id = session.add_spectrum(spectrum)?;

    for (arf_path, rmf_path) in args.arf.iter().zip(&args.rmf) {
        let arf = session.load_arf(&load_calibration_file(arf_path)?)?;
        let rmf = session.load_rmf(&load_calibration_file(rmf_path)?)?;
        session.assign_response(id, ResponsePair::new(arf, rmf))?;
    }

    if let Some(path) = &args.background {
        let background = Background::from_spectrum(&load_spectrum(path, args.unit)?)?;
        session.set_background(id, background)?;
    }

    if let Some(range) = &args.notice {
        session.ignore_all(id)?;
        session.notice_range(id, range[0], range[1], args.unit)?;
    }

    match (&args.mask, args.min_counts) {
        (Some(mask), _) => session.rebin_spectrum(id, mask)?,
        (None, Some(threshold)) => session.group_min_counts(id, threshold)?,
        (None, None) => {}
    }

    debug!(
        spectrum = %args.spectrum.display(),
        responses = args.arf.len(),
        bins = session.spectrum(id)?.num_bins(),
        "session prepared"
    );
    Ok((session, id))
}

/// Source models available from the command line.
#[derive(Debug, Clone)]
pub(super) enum CliModel {
    /// Flat flux density, integrated over each bin.
    Flat(f64),
    /// Bin-integrated flux tabulated on its own grid.
    Table { grid: Grid, values: Vec<f64> },
}

impl CliModel {
    pub(super) fn from_table(path: &Path, unit: GridUnit) -> Result<Self, CliError> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read model table '{}'", path.display()))?;
        let origin = path.display().to_string();
        let columns = parse_ascii_columns(&origin, &text, 3)?;
        let (Some(lo), Some(hi), Some(values)) =
            (columns.column(0), columns.column(1), columns.column(2))
        else {
            return Err(CliError::Usage(format!(
                "model table '{origin}' needs lo, hi and flux columns"
            )));
        };
        let canonical = canonicalize(lo, hi, unit).map_err(XrespError::from)?;
        let mut values = values.to_vec();
        if canonical.reversed {
            values.reverse();
        }
        Ok(Self::Table {
            grid: canonical.grid,
            values,
        })
    }
}

impl ModelEvaluator for CliModel {
    fn evaluate(&mut self, grid: &Grid) -> Vec<f64> {
        match self {
            Self::Flat(density) => (0..grid.len()).map(|index| *density * grid.width(index)).collect(),
            // Lengths were checked when the table was parsed; an empty result
            // surfaces as a model length error.
            Self::Table { grid: source, values } => {
                rebin_integrated(grid, source, values).unwrap_or_default()
            }
        }
    }
}

pub(super) fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create '{}'", parent.display()))?;
            }
            fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("failed to write '{}'", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
