//! Daemon command line: configuration flags for `ortho_config` and the
//! daemon's own start-up flags for `clap`.
//!
//! Unlike the CLI, the daemon has no subcommand, so flags may appear in any
//! order. Configuration flags and their values are routed to the loader;
//! everything else is parsed as [`DaemonOptions`].

use std::ffi::{OsStr, OsString};

use clap::Parser;

/// Flags consumed by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `nekoray_config::Config`.
const CONFIG_FLAGS: &[&str] = &[
    "--config-path",
    "--config-dir",
    "--core-path",
    "--http-bind",
    "--http-port",
    "--log-filter",
    "--log-format",
];

const CONFIG_HELP: &str = "\
Configuration flags (also read from nekoray.toml and NEKORAY_* variables):
      --config-path <PATH>    Configuration file to load
      --config-dir <DIR>      Directory holding the settings document
      --core-path <PATH>      Proxy-core executable
      --http-bind <ADDRESS>   Address the HTTP API binds to
      --http-port <PORT>      Port the HTTP API listens on
      --log-filter <FILTER>   tracing filter directive
      --log-format <FORMAT>   Telemetry format: json or compact";

/// Start-up actions requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(
    name = "nekorayd",
    version,
    about = "Headless proxy supervisor with an HTTP API",
    after_help = CONFIG_HELP
)]
pub(crate) struct DaemonOptions {
    /// Load this profile and start the proxy once the API is up.
    #[arg(
        long = "auto-start",
        value_name = "PROFILE_ID",
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(1..=100)
    )]
    pub(crate) auto_start: Option<i64>,
    /// Start TUN mode shortly after launch.
    #[arg(long)]
    pub(crate) tun: bool,
}

/// Arguments partitioned between the two parsers.
///
/// Both vectors start with the program name.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) daemon_arguments: Vec<OsString>,
}

fn config_flag(argument: &OsStr) -> Option<bool> {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    CONFIG_FLAGS.contains(&flag).then_some(!inline_value)
}

pub(crate) fn split_arguments(args: &[OsString]) -> ArgumentSplit {
    let mut split = ArgumentSplit::default();
    let mut remaining = args.iter();
    if let Some(program) = remaining.next() {
        split.config_arguments.push(program.clone());
        split.daemon_arguments.push(program.clone());
    }
    while let Some(argument) = remaining.next() {
        match config_flag(argument) {
            Some(needs_value) => {
                split.config_arguments.push(argument.clone());
                if needs_value && let Some(value) = remaining.next() {
                    split.config_arguments.push(value.clone());
                }
            }
            None => split.daemon_arguments.push(argument.clone()),
        }
    }
    split
}
