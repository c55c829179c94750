//! Serve context
//!
//! Everything a worker inherits from its process: the logging sink, the
//! shared `/dev/null` handle and the framework configuration. Built once by
//! the binary and passed down; nothing here is a global.

use eds_core::Logger;
use eds_io::NullFd;

use crate::config::ServeConfig;
use crate::error::Result;

#[derive(Debug)]
pub struct ServeContext {
    pub logger: Logger,
    pub nullfd: NullFd,
    pub config: ServeConfig,
}

impl ServeContext {
    /// Stderr logger named `ident`, configuration from the environment.
    pub fn new(ident: impl Into<String>) -> Result<Self> {
        Self::with_config(Logger::stderr(ident), ServeConfig::from_env())
    }

    pub fn with_config(logger: Logger, config: ServeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            logger,
            nullfd: NullFd::open()?,
            config,
        })
    }
}
