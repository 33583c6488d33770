//! Platform strategies for running the tunnel process with elevated rights.
//!
//! A launcher only turns `(core, config)` into a command line; the spawned
//! process is owned by [`crate::supervisor::TunSupervisor`].

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Arguments that make the core run a configuration file.
#[must_use]
pub fn core_arguments(config: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--disable-color"),
        OsString::from("run"),
        OsString::from("-c"),
        config.as_os_str().to_owned(),
    ]
}

/// Program and arguments produced by a launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable to spawn.
    pub program: OsString,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
    /// Wrapper script generated for this launch, removed on stop.
    pub script: Option<PathBuf>,
}

impl LaunchCommand {
    /// Command without a generated script.
    #[must_use]
    pub fn new(program: impl Into<OsString>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            script: None,
        }
    }
}

/// Errors raised while preparing a privileged launch.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The wrapper script could not be written.
    #[error("failed to write launch script '{path}': {source}")]
    Script {
        /// Script path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Chooses how the tunnel process gains elevated privileges.
pub trait PrivilegeLauncher: Send + Sync + fmt::Debug {
    /// Builds the command that runs `core` against `config`.
    fn command(&self, core: &Path, config: &Path) -> Result<LaunchCommand, LaunchError>;

    /// Command signalling every instance of `core` system-wide, if needed.
    ///
    /// The escalation helper may re-execute the core under a different pid,
    /// so stopping only the spawned handle can leave the tunnel running.
    fn interrupt_command(&self, _core: &Path) -> Option<LaunchCommand> {
        None
    }
}

/// Runs the core directly, relying on OS-level elevation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLauncher;

impl PrivilegeLauncher for DirectLauncher {
    fn command(&self, core: &Path, config: &Path) -> Result<LaunchCommand, LaunchError> {
        Ok(LaunchCommand::new(core, core_arguments(config)))
    }
}

/// Runs a wrapper script through `pkexec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PkexecLauncher;

impl PrivilegeLauncher for PkexecLauncher {
    fn command(&self, core: &Path, config: &Path) -> Result<LaunchCommand, LaunchError> {
        let script = write_launch_script(core, config)?;
        Ok(LaunchCommand {
            program: OsString::from("pkexec"),
            args: vec![OsString::from("bash"), script.as_os_str().to_owned()],
            script: Some(script),
        })
    }

    fn interrupt_command(&self, core: &Path) -> Option<LaunchCommand> {
        let name = core.file_name()?;
        Some(LaunchCommand::new(
            "pkexec",
            vec![
                OsString::from("killall"),
                OsString::from("-2"),
                name.to_owned(),
            ],
        ))
    }
}

/// Runs a wrapper script through an AppleScript administrator prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsascriptLauncher;

impl PrivilegeLauncher for OsascriptLauncher {
    fn command(&self, core: &Path, config: &Path) -> Result<LaunchCommand, LaunchError> {
        let script = write_launch_script(core, config)?;
        let statement = format!(
            "do shell script \"bash \" & quoted form of {} with administrator privileges",
            applescript_string(&script.to_string_lossy())
        );
        Ok(LaunchCommand {
            program: OsString::from("osascript"),
            args: vec![OsString::from("-e"), OsString::from(statement)],
            script: Some(script),
        })
    }

    fn interrupt_command(&self, core: &Path) -> Option<LaunchCommand> {
        let name = core.file_name()?.to_string_lossy().into_owned();
        let statement = format!(
            "do shell script \"killall -2 \" & quoted form of {} with administrator privileges",
            applescript_string(&name)
        );
        Some(LaunchCommand::new(
            "osascript",
            vec![OsString::from("-e"), OsString::from(statement)],
        ))
    }
}

/// Selects the launcher for the platform this binary was built for.
#[must_use]
pub fn for_current_platform() -> Box<dyn PrivilegeLauncher> {
    if cfg!(windows) {
        Box::new(DirectLauncher)
    } else if cfg!(target_os = "macos") {
        Box::new(OsascriptLauncher)
    } else {
        Box::new(PkexecLauncher)
    }
}

/// Path of the wrapper script generated for `config`.
#[must_use]
pub fn script_path_for(config: &Path) -> PathBuf {
    config.with_extension("sh")
}

/// Renders the exec wrapper run under privilege escalation.
#[must_use]
pub fn render_launch_script(core: &Path, config: &Path) -> String {
    let working_dir = config.parent().unwrap_or_else(|| Path::new("/"));
    format!(
        "#!/bin/bash\n\
         # Generated by nekoray; runs the proxy core in TUN mode.\n\
         cd {} || exit 1\n\
         exec {} --disable-color run -c {}\n",
        shell_quote(working_dir),
        shell_quote(core),
        shell_quote(config)
    )
}

/// Single-quotes `path` for bash, splicing embedded quotes as `'\''`.
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Renders `text` as an AppleScript string literal.
fn applescript_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', r"\\").replace('"', r#"\""#))
}

fn write_launch_script(core: &Path, config: &Path) -> Result<PathBuf, LaunchError> {
    let path = script_path_for(config);
    let map_error = |source| LaunchError::Script {
        path: path.clone(),
        source,
    };
    fs::write(&path, render_launch_script(core, config)).map_err(map_error)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(map_error)?;
    }
    Ok(path)
}
