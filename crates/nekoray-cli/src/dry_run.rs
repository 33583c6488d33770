//! Validation-only rehearsal of mutating commands.
//!
//! A rehearsal checks the profile range and, for `start` and `restart`, that
//! both inbound ports can be bound on the configured address. No process is
//! launched and the settings document is not modified.

use std::io::Write;
use std::net::TcpListener;

use nekoray_core::store::keys;
use nekoray_core::{ProfileId, ServiceOrchestrator};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::errors::AppError;

const DRY_RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dry_run");

/// Validates `cli.command` and prints what it would do.
pub(crate) fn rehearse<W: Write>(
    cli: &Cli,
    service: &ServiceOrchestrator,
    stdout: &mut W,
) -> Result<(), AppError> {
    match cli.command {
        Command::Start { profile_id } => {
            let profile = validate_profile(profile_id)?;
            writeln!(stdout, "DRY RUN: Would start proxy with profile {profile}")?;
            rehearse_launch(cli, service, stdout)?;
        }
        Command::Restart { profile_id } => {
            let profile = validate_profile(profile_id)?;
            writeln!(stdout, "DRY RUN: Would restart proxy with profile {profile}")?;
            rehearse_launch(cli, service, stdout)?;
        }
        Command::Stop => writeln!(stdout, "DRY RUN: Would stop proxy")?,
        Command::TunStart => writeln!(stdout, "DRY RUN: Would start TUN mode")?,
        Command::TunStop => writeln!(stdout, "DRY RUN: Would stop TUN mode")?,
        Command::Status | Command::Config => {}
    }
    Ok(())
}

/// Checks the inbound ports a launch would bind and reports the tunnel.
fn rehearse_launch<W: Write>(
    cli: &Cli,
    service: &ServiceOrchestrator,
    stdout: &mut W,
) -> Result<(), AppError> {
    let address = service.socks_address();
    let (socks_port, http_port) = match cli.port {
        Some(port) => (port, port.saturating_add(1)),
        None => (service.socks_port(), service.http_port()),
    };
    for (label, port) in [("SOCKS5", socks_port), ("HTTP", http_port)] {
        ensure_bindable(label, &address, port)?;
        writeln!(stdout, "DRY RUN: Would bind {label} to {address}:{port}")?;
    }
    if cli.tun || vpn_enabled(service) {
        writeln!(stdout, "DRY RUN: Would start TUN mode")?;
    }
    Ok(())
}

fn validate_profile(profile_id: i64) -> Result<ProfileId, AppError> {
    ProfileId::new(profile_id).map_err(|error| AppError::DryRun {
        reason: error.to_string(),
    })
}

fn ensure_bindable(label: &str, address: &str, port: u16) -> Result<(), AppError> {
    match TcpListener::bind((address, port)) {
        Ok(listener) => {
            debug!(target: DRY_RUN_TARGET, label, address, port, "port available");
            drop(listener);
            Ok(())
        }
        Err(error) => Err(AppError::DryRun {
            reason: format!("{label} port {port} is not available on {address}: {error}"),
        }),
    }
}

fn vpn_enabled(service: &ServiceOrchestrator) -> bool {
    service
        .current_config()
        .get(keys::SPMODE_VPN)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
