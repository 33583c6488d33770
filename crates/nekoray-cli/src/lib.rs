//! Command-line interface runtime for the nekoray proxy supervisor.
//!
//! The module owns argument parsing, configuration bootstrapping, and a
//! single orchestrator instance for the duration of one command. The
//! orchestrator shuts down when the command completes, so a proxy started
//! here lives only as long as the invocation; `nekorayd` hosts long-running
//! sessions. The runtime is exercised both from the binary entrypoint and
//! from tests where configuration loading and IO streams are substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use nekoray_config::Config;
use nekoray_core::{LogLevel, ServiceDeps, ServiceEvent, ServiceOrchestrator, telemetry};

mod cli;
mod commands;
mod config;
mod dry_run;
mod errors;
mod format;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `nekoray_config::Config`
/// that are meaningful to the CLI.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--config-dir",
    "--core-path",
    "--log-filter",
    "--log-format",
];

const VERBOSE_FILTER: &str = "debug";

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let cli = match Cli::try_parse_from(split.command_arguments(&args)) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", AppError::CliUsage(error));
            return ExitCode::FAILURE;
        }
    };

    let result = loader
        .load(&split.config_arguments)
        .and_then(|config| execute(&cli, &config, stdout));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(cli: &Cli, config: &Config, stdout: &mut W) -> Result<(), AppError> {
    let filter = if cli.verbose {
        VERBOSE_FILTER
    } else {
        config.log_filter()
    };
    telemetry::initialise_with_filter(config, filter)?;

    let service = ServiceOrchestrator::new(ServiceDeps::from_config(config));
    let events = service.subscribe();
    service
        .initialize(config.config_dir())
        .map_err(AppError::service("failed to initialise service"))?;

    let outcome = if cli.dry_run && cli.command.mutates() {
        dry_run::rehearse(cli, &service, stdout)
    } else {
        commands::execute(cli, &service, stdout)
    };
    write_service_messages(events.try_iter(), cli.verbose, stdout)?;
    outcome
}

/// Echoes service log events; warnings always, everything when verbose.
///
/// Error events are skipped because the failing command reports them.
fn write_service_messages<W: Write>(
    events: impl IntoIterator<Item = ServiceEvent>,
    verbose: bool,
    stdout: &mut W,
) -> Result<(), AppError> {
    for event in events {
        if matches!(event, ServiceEvent::Error(_)) {
            continue;
        }
        let Some((level, message)) = event.log_entry() else {
            continue;
        };
        if verbose || matches!(level, LogLevel::Warn | LogLevel::Error) {
            writeln!(stdout, "[{}] {message}", level.to_string().to_uppercase())?;
        }
    }
    Ok(())
}
