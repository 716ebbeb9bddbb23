mod commands;
mod helpers;

use clap::Parser;
use std::path::PathBuf;
use xresp_core::domain::XrespError;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let engine_error = error.as_xresp_error();
            eprintln!("{}", engine_error.diagnostic_line());
            engine_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("xresp".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            helpers::init_logging(cli.verbose);
            let config = helpers::load_config(cli.config.as_deref())?;
            dispatch_parsed(cli.command, config)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(name = "xresp", about = "X-ray instrument response folding and rebinning")]
struct Cli {
    /// Engine configuration JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Fold a source model through the responses of a spectrum
    Fold(commands::FoldArgs),
    /// Group a spectrum and report the working bins
    Rebin(commands::RebinArgs),
    /// Flux-correct a spectrum with its responses
    Flux(commands::FluxArgs),
    /// Summarize a redistribution matrix
    #[command(name = "inspect-rmf")]
    InspectRmf(commands::InspectRmfArgs),
}

fn dispatch_parsed(
    command: CliCommand,
    config: xresp_core::common::config::EngineConfig,
) -> Result<i32, CliError> {
    match command {
        CliCommand::Fold(args) => commands::run_fold_command(args, config),
        CliCommand::Rebin(args) => commands::run_rebin_command(args, config),
        CliCommand::Flux(args) => commands::run_flux_command(args, config),
        CliCommand::InspectRmf(args) => commands::run_inspect_rmf_command(args, config),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(XrespError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<XrespError> for CliError {
    fn from(error: XrespError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_xresp_error(&self) -> XrespError {
        match self {
            Self::Usage(message) => XrespError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => XrespError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
