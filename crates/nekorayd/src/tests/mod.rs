#[cfg(unix)]
mod daemon_behaviour;
pub(crate) mod support;
