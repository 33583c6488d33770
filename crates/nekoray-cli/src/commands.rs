//! Command execution against the service orchestrator.

use std::io::Write;

use nekoray_core::store::keys;
use nekoray_core::{ServiceOrchestrator, ServiceState};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::errors::AppError;
use crate::format::format_bytes;

/// Runs `cli.command` and writes its report to `stdout`.
pub(crate) fn execute<W: Write>(
    cli: &Cli,
    service: &ServiceOrchestrator,
    stdout: &mut W,
) -> Result<(), AppError> {
    match cli.command {
        Command::Start { profile_id } => {
            apply_overrides(cli, service)?;
            start(service, profile_id, stdout)
        }
        Command::Restart { profile_id } => {
            apply_overrides(cli, service)?;
            restart(service, profile_id, stdout)
        }
        Command::Stop => {
            service
                .stop_proxy()
                .map_err(AppError::service("failed to stop proxy"))?;
            writeln!(stdout, "Proxy stopped successfully")?;
            Ok(())
        }
        Command::Status => status(service, stdout),
        Command::TunStart => {
            service
                .start_tun_mode()
                .map_err(AppError::service("failed to start TUN mode"))?;
            writeln!(stdout, "TUN mode started successfully")?;
            Ok(())
        }
        Command::TunStop => {
            service
                .stop_tun_mode()
                .map_err(AppError::service("failed to stop TUN mode"))?;
            writeln!(stdout, "TUN mode stopped successfully")?;
            Ok(())
        }
        Command::Config => {
            let rendered = serde_json::to_string_pretty(&service.current_config())
                .map_err(AppError::RenderConfig)?;
            writeln!(stdout, "{rendered}")?;
            Ok(())
        }
    }
}

/// Applies `--tun` and `--port` for this invocation only.
///
/// The saved settings are left as they were.
fn apply_overrides(cli: &Cli, service: &ServiceOrchestrator) -> Result<(), AppError> {
    if cli.tun {
        service
            .override_config_value(keys::SPMODE_VPN, Value::Bool(true))
            .map_err(AppError::service("failed to enable TUN mode"))?;
    }
    if let Some(port) = cli.port {
        service
            .override_config_value(keys::INBOUND_SOCKS_PORT, Value::from(port))
            .map_err(AppError::service("failed to set SOCKS5 port"))?;
        service
            .override_config_value(keys::INBOUND_HTTP_PORT, Value::from(port.saturating_add(1)))
            .map_err(AppError::service("failed to set HTTP port"))?;
    }
    Ok(())
}

fn start<W: Write>(
    service: &ServiceOrchestrator,
    profile_id: i64,
    stdout: &mut W,
) -> Result<(), AppError> {
    service
        .load_profile(profile_id)
        .map_err(AppError::service("failed to load profile"))?;
    service
        .start_proxy()
        .map_err(AppError::service("failed to start proxy"))?;
    writeln!(stdout, "Proxy started successfully with profile {profile_id}")?;
    write_endpoints(service, stdout)
}

fn restart<W: Write>(
    service: &ServiceOrchestrator,
    profile_id: i64,
    stdout: &mut W,
) -> Result<(), AppError> {
    service
        .load_profile(profile_id)
        .map_err(AppError::service("failed to load profile"))?;
    service
        .restart_proxy()
        .map_err(AppError::service("failed to restart proxy"))?;
    writeln!(stdout, "Proxy restarted successfully with profile {profile_id}")?;
    Ok(())
}

fn status<W: Write>(service: &ServiceOrchestrator, stdout: &mut W) -> Result<(), AppError> {
    let state = service.status();
    writeln!(stdout, "Service Status: {state}")?;
    match service.current_profile_id() {
        Some(profile) => writeln!(stdout, "Current Profile: {profile}")?,
        None => writeln!(stdout, "Current Profile: None")?,
    }
    let tun = if service.is_tun_mode_running() {
        "Running"
    } else {
        "Stopped"
    };
    writeln!(stdout, "TUN Mode: {tun}")?;

    if state == ServiceState::Running {
        write_endpoints(service, stdout)?;
        writeln!(stdout, "Upload: {}", format_bytes(service.upload_bytes()))?;
        writeln!(stdout, "Download: {}", format_bytes(service.download_bytes()))?;
    }
    Ok(())
}

fn write_endpoints<W: Write>(service: &ServiceOrchestrator, stdout: &mut W) -> Result<(), AppError> {
    writeln!(
        stdout,
        "SOCKS5: {}:{}",
        service.socks_address(),
        service.socks_port()
    )?;
    writeln!(
        stdout,
        "HTTP: {}:{}",
        service.http_address(),
        service.http_port()
    )?;
    Ok(())
}
