//! Service status and profile selection.

use std::fmt;

use serde::Serialize;
use strum::Display;

use crate::error::ServiceError;

/// Lifecycle state of the managed proxy service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// No core process is managed.
    #[default]
    Stopped,
    /// The core process is being launched.
    Starting,
    /// The core process is up and traffic is sampled.
    Running,
    /// Subprocesses are being torn down.
    Stopping,
    /// The last start failed or the core exited unexpectedly.
    Error,
}

impl ServiceState {
    /// Lowercase label used by the HTTP surface.
    #[must_use]
    pub const fn as_lowercase(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

/// Identifier of the active server profile.
///
/// Only `1..=100` is accepted; "no profile" is modelled as `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProfileId(u32);

impl ProfileId {
    /// Smallest accepted identifier.
    pub const MIN: i64 = 1;
    /// Largest accepted identifier.
    pub const MAX: i64 = 100;

    /// Validates a raw identifier.
    pub fn new(raw: i64) -> Result<Self, ServiceError> {
        if (Self::MIN..=Self::MAX).contains(&raw) {
            u32::try_from(raw)
                .map(Self)
                .map_err(|_| ServiceError::InvalidProfile { id: raw })
        } else {
            Err(ServiceError::InvalidProfile { id: raw })
        }
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for ProfileId {
    type Error = ServiceError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}
