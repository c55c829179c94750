//! Well-known service socket locations.
//!
//! Sockets live in the runtime directory named by `EDS_RUNDIR`, or
//! `/var/run/eds` when unset.

use std::path::PathBuf;

use eds_core::env::env_get_str;

pub const RUNDIR_ENV: &str = "EDS_RUNDIR";
pub const DEFAULT_RUNDIR: &str = "/var/run/eds";

pub const RESOLVER: &str = "resolver.sock";
pub const CONNECTOR: &str = "connector.sock";
pub const SWEEPER: &str = "sweeper.sock";
pub const ECHO: &str = "echo.sock";

pub fn rundir() -> PathBuf {
    PathBuf::from(env_get_str(RUNDIR_ENV, DEFAULT_RUNDIR))
}

/// `name` resolved against the runtime directory.
pub fn socket(name: &str) -> PathBuf {
    rundir().join(name)
}
