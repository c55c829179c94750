//! EDS configuration
//!
//! Provides built-in defaults with runtime environment overrides. Settings
//! made on a `Service` builder take precedence over both.
//!
//! # Example
//!
//! ```rust,ignore
//! use eds::config::ServeConfig;
//!
//! // Defaults with env overrides
//! let config = ServeConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ServeConfig::from_env()
//!     .nprocs(4)
//!     .tick_slice(Duration::from_millis(250));
//! ```

pub mod defaults;

use std::time::Duration;

use eds_core::env::{env_get, env_get_ms};
use thiserror::Error;

/// Framework configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    /// Worker processes per service
    pub nprocs: usize,
    /// Maximum clients per worker
    pub nfds: usize,
    /// Ticker period
    pub tick_slice: Duration,
    /// Accept-to-first-byte timeout, zero when disabled
    pub accept_timeout: Duration,
    /// Consecutive accept failures before a worker gives up its listener
    pub max_aretries: usize,
    /// Frame payload limit handed to services
    pub max_msg_size: usize,
    /// First restart delay
    pub restart_backoff: Duration,
    /// Restart delay cap
    pub restart_backoff_max: Duration,
    /// Uptime that resets the restart delay
    pub restart_reset: Duration,
    /// Stop signal to SIGKILL grace period
    pub shutdown_grace: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServeConfig {
    /// Create config from built-in defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `EDS_NPROCS` - Worker processes per service
    /// - `EDS_NFDS` - Clients per worker
    /// - `EDS_TICK_SLICE_MS` - Ticker period
    /// - `EDS_ACCEPT_TIMEOUT_MS` - Accept-to-first-byte timeout (0 = off)
    /// - `EDS_MAX_ARETRIES` - Accept failures tolerated (0 = unlimited)
    /// - `EDS_MAX_MSG_SIZE` - Frame payload limit in bytes
    /// - `EDS_RESTART_BACKOFF_MS` - First restart delay (0 = immediate)
    /// - `EDS_RESTART_BACKOFF_MAX_MS` - Restart delay cap
    /// - `EDS_RESTART_RESET_MS` - Uptime that resets the delay
    /// - `EDS_SHUTDOWN_GRACE_MS` - Grace period before SIGKILL
    pub fn from_env() -> Self {
        Self {
            nprocs: env_get("EDS_NPROCS", defaults::NPROCS),
            nfds: env_get("EDS_NFDS", defaults::NFDS),
            tick_slice: env_get_ms("EDS_TICK_SLICE_MS", defaults::TICK_SLICE_MS),
            accept_timeout: env_get_ms("EDS_ACCEPT_TIMEOUT_MS", defaults::ACCEPT_TIMEOUT_MS),
            max_aretries: env_get("EDS_MAX_ARETRIES", defaults::MAX_ARETRIES),
            max_msg_size: env_get("EDS_MAX_MSG_SIZE", defaults::MAX_MSG_SIZE),
            restart_backoff: env_get_ms("EDS_RESTART_BACKOFF_MS", defaults::RESTART_BACKOFF_MS),
            restart_backoff_max: env_get_ms(
                "EDS_RESTART_BACKOFF_MAX_MS",
                defaults::RESTART_BACKOFF_MAX_MS,
            ),
            restart_reset: env_get_ms("EDS_RESTART_RESET_MS", defaults::RESTART_RESET_MS),
            shutdown_grace: env_get_ms("EDS_SHUTDOWN_GRACE_MS", defaults::SHUTDOWN_GRACE_MS),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            nprocs: defaults::NPROCS,
            nfds: defaults::NFDS,
            tick_slice: Duration::from_millis(defaults::TICK_SLICE_MS),
            accept_timeout: Duration::from_millis(defaults::ACCEPT_TIMEOUT_MS),
            max_aretries: defaults::MAX_ARETRIES,
            max_msg_size: defaults::MAX_MSG_SIZE,
            restart_backoff: Duration::from_millis(defaults::RESTART_BACKOFF_MS),
            restart_backoff_max: Duration::from_millis(defaults::RESTART_BACKOFF_MAX_MS),
            restart_reset: Duration::from_millis(defaults::RESTART_RESET_MS),
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
        }
    }

    // Builder methods

    pub fn nprocs(mut self, n: usize) -> Self {
        self.nprocs = n;
        self
    }

    pub fn nfds(mut self, n: usize) -> Self {
        self.nfds = n;
        self
    }

    pub fn tick_slice(mut self, d: Duration) -> Self {
        self.tick_slice = d;
        self
    }

    pub fn accept_timeout(mut self, d: Duration) -> Self {
        self.accept_timeout = d;
        self
    }

    pub fn max_aretries(mut self, n: usize) -> Self {
        self.max_aretries = n;
        self
    }

    pub fn max_msg_size(mut self, n: usize) -> Self {
        self.max_msg_size = n;
        self
    }

    pub fn restart_backoff(mut self, d: Duration) -> Self {
        self.restart_backoff = d;
        self
    }

    pub fn restart_backoff_max(mut self, d: Duration) -> Self {
        self.restart_backoff_max = d;
        self
    }

    pub fn restart_reset(mut self, d: Duration) -> Self {
        self.restart_reset = d;
        self
    }

    pub fn shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nprocs == 0 {
            return Err(ConfigError::InvalidValue("nprocs must be > 0"));
        }
        if self.nfds == 0 {
            return Err(ConfigError::InvalidValue("nfds must be > 0"));
        }
        if self.tick_slice.is_zero() {
            return Err(ConfigError::InvalidValue("tick_slice must be > 0"));
        }
        if self.max_msg_size == 0 || self.max_msg_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_msg_size must be in 1..=u32::MAX"));
        }
        if self.restart_backoff > self.restart_backoff_max {
            return Err(ConfigError::InvalidValue(
                "restart_backoff must be <= restart_backoff_max",
            ));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("EDS Configuration:");
        eprintln!("  nprocs:               {}", self.nprocs);
        eprintln!("  nfds:                 {}", self.nfds);
        eprintln!("  tick_slice:           {:?}", self.tick_slice);
        eprintln!("  accept_timeout:       {:?}", self.accept_timeout);
        eprintln!("  max_aretries:         {}", self.max_aretries);
        eprintln!("  max_msg_size:         {}", self.max_msg_size);
        eprintln!("  restart_backoff:      {:?}", self.restart_backoff);
        eprintln!("  restart_backoff_max:  {:?}", self.restart_backoff_max);
        eprintln!("  restart_reset:        {:?}", self.restart_reset);
        eprintln!("  shutdown_grace:       {:?}", self.shutdown_grace);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        let config = ServeConfig::new();
        assert_eq!(config.nprocs, defaults::NPROCS);
        assert_eq!(config.max_msg_size, 4 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServeConfig::new()
            .nprocs(4)
            .tick_slice(Duration::from_millis(5))
            .restart_backoff(Duration::ZERO);

        assert_eq!(config.nprocs, 4);
        assert_eq!(config.tick_slice, Duration::from_millis(5));
        assert!(config.restart_backoff.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ServeConfig::new().nprocs(0).validate().is_err());
        assert!(ServeConfig::new().nfds(0).validate().is_err());
        assert!(ServeConfig::new().tick_slice(Duration::ZERO).validate().is_err());
        assert_eq!(
            ServeConfig::new()
                .restart_backoff(Duration::from_secs(10))
                .validate(),
            Err(ConfigError::InvalidValue("restart_backoff must be <= restart_backoff_max"))
        );
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("EDS_SHUTDOWN_GRACE_MS", "250");
        let config = ServeConfig::from_env();
        std::env::remove_var("EDS_SHUTDOWN_GRACE_MS");
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
    }
}
