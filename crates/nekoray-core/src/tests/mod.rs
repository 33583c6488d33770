//! Cross-module test suites for the service layer.

#[cfg(unix)]
pub(crate) mod support;
