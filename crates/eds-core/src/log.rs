//! Logging sink
//!
//! A [`Logger`] is an explicit value, not a global: it owns a
//! `tracing::Dispatch` and installs it only for the closure passed to
//! [`Logger::scope`]. Services receive it through their serve context, so a
//! worker process and a test harness can log to different sinks.
//!
//! The filter is read from `EDS_LOG` using `tracing_subscriber::EnvFilter`
//! syntax (`info`, `eds=debug,ycl=trace`, ...).

use std::fmt;

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "EDS_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Clone)]
pub struct Logger {
    ident: String,
    dispatch: Dispatch,
}

impl Logger {
    /// Log to stderr, filtered by `EDS_LOG` (default `info`).
    pub fn stderr(ident: impl Into<String>) -> Self {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        Self::build(ident.into(), filter)
    }

    /// Log to stderr with an explicit filter directive.
    pub fn with_filter(ident: impl Into<String>, directive: &str) -> Self {
        Self::build(ident.into(), EnvFilter::new(directive))
    }

    /// Discard everything.
    pub fn sink() -> Self {
        Self {
            ident: String::new(),
            dispatch: Dispatch::none(),
        }
    }

    fn build(ident: String, filter: EnvFilter) -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        Self {
            ident,
            dispatch: Dispatch::new(subscriber),
        }
    }

    #[inline]
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Run `f` with this logger as the current dispatcher.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let span = tracing::info_span!("eds", ident = %self.ident);
            let _guard = span.enter();
            f()
        })
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("ident", &self.ident).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_returns_value() {
        let log = Logger::sink();
        let v = log.scope(|| {
            tracing::info!("swallowed");
            7
        });
        assert_eq!(v, 7);
    }

    #[test]
    fn test_filter_logger_ident() {
        let log = Logger::with_filter("edsd", "warn");
        assert_eq!(log.ident(), "edsd");
        log.scope(|| tracing::debug!("filtered out"));
    }
}
