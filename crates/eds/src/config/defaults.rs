//! Built-in configuration defaults

/// Worker processes per service.
pub const NPROCS: usize = 1;

/// Maximum clients per worker.
pub const NFDS: usize = 1024;

/// Ticker period in milliseconds.
pub const TICK_SLICE_MS: u64 = 1000;

/// Accept-to-first-byte timeout in milliseconds. 0 disables it.
pub const ACCEPT_TIMEOUT_MS: u64 = 0;

/// Consecutive accept failures tolerated. 0 means unlimited.
pub const MAX_ARETRIES: usize = 16;

/// Frame payload limit.
pub const MAX_MSG_SIZE: usize = eds_core::DEFAULT_MAX_MSG_SIZE;

/// First restart delay after a worker exits. 0 restarts immediately.
pub const RESTART_BACKOFF_MS: u64 = 100;

pub const RESTART_BACKOFF_MAX_MS: u64 = 5000;

/// Uptime after which a worker's restart delay starts over.
pub const RESTART_RESET_MS: u64 = 10_000;

/// Time between forwarding a stop signal and SIGKILL.
pub const SHUTDOWN_GRACE_MS: u64 = 1000;
