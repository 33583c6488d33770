//! Entrypoint for the nekoray daemon.

use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use nekorayd::LaunchError;

fn main() -> ExitCode {
    match nekorayd::run_daemon(env::args_os()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(LaunchError::Usage { source }) => {
            let _ = source.print();
            if source.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}
