//! CLI entrypoint for the nekoray proxy supervisor.
//!
//! The binary delegates to [`nekoray_cli::run`], which loads configuration,
//! parses the command line, and drives the service orchestrator for a single
//! command.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    nekoray_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
