//! Command-line argument definitions for the nekoray CLI.

use clap::{Parser, Subcommand};

/// Command-line interface for the nekoray proxy supervisor.
#[derive(Parser, Debug)]
#[command(
    name = "nekoray",
    version,
    about = "Headless supervisor for the nekoray proxy core",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Prints service log messages and raises the log filter to `debug`.
    #[arg(short, long)]
    pub(crate) verbose: bool,
    /// Validates the command without launching any process.
    #[arg(short = 'n', long)]
    pub(crate) dry_run: bool,
    /// Enables TUN mode before starting the proxy.
    #[arg(short, long)]
    pub(crate) tun: bool,
    /// Overrides the SOCKS5 port; the HTTP inbound uses the next port.
    #[arg(short, long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..=65535))]
    pub(crate) port: Option<u16>,
    /// Command to execute.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Commands understood by the CLI.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Starts the proxy with a profile.
    Start {
        /// Profile identifier between 1 and 100.
        #[arg(value_name = "PROFILE_ID", allow_negative_numbers = true)]
        profile_id: i64,
    },
    /// Stops the proxy.
    Stop,
    /// Restarts the proxy with a profile.
    Restart {
        /// Profile identifier between 1 and 100.
        #[arg(value_name = "PROFILE_ID", allow_negative_numbers = true)]
        profile_id: i64,
    },
    /// Shows the service status.
    Status,
    /// Starts TUN mode.
    TunStart,
    /// Stops TUN mode.
    TunStop,
    /// Prints the effective configuration.
    Config,
}

impl Command {
    /// Whether the command launches a process and so honours `--dry-run`.
    pub(crate) const fn mutates(self) -> bool {
        !matches!(self, Self::Status | Self::Config)
    }
}
