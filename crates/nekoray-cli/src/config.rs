//! Configuration loading helpers for the nekoray CLI.
//!
//! Leading configuration flags are routed to `ortho_config`; everything from
//! the first other token onwards is parsed as the CLI command.

use std::ffi::{OsStr, OsString};

use nekoray_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

pub(crate) trait ConfigLoader {
    /// Loads configuration for the CLI.
    ///
    /// Configuration flags (listed in `CONFIG_CLI_FLAGS`) must appear before
    /// the command. Later occurrences are parsed as command options and
    /// rejected as unknown.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if crate::CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

impl ConfigArgumentSplit {
    /// Program name followed by the command tokens.
    pub(crate) fn command_arguments(&self, args: &[OsString]) -> Vec<OsString> {
        args.first()
            .into_iter()
            .chain(args.iter().skip(self.command_start))
            .cloned()
            .collect()
    }
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some(program) = args.first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut index = 1;
    while let Some(argument) = args.get(index) {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                index += 1;
                if needs_value && let Some(value) = args.get(index) {
                    config_arguments.push(value.clone());
                    index += 1;
                }
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments,
        command_start: index,
    }
}
