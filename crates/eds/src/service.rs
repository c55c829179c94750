//! Service definitions
//!
//! A [`Service`] describes one listener: its name, socket path, the callbacks
//! a fresh client starts with, and per-service overrides of the framework
//! configuration. `U` is the per-client user data (created with
//! `U::default()` on accept), `S` the service-wide data handed to every
//! callback through [`SvcCtx`].
//!
//! ```ignore
//! let mut echo = Service::<EchoCli>::new("echo", "/var/run/eds/echo.sock")
//!     .on_readable(on_request)
//!     .on_finalize(on_finalize)
//!     .nprocs(2);
//! eds::serve(&mut [&mut echo], &ctx)?;
//! ```

use std::fmt;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::wait::WaitStatus;

use eds_io::{Io, DEFAULT_BACKLOG};

use crate::client::Action;
use crate::config::ServeConfig;
use crate::context::ServeContext;
use crate::error::{EdsError, Result};
use crate::worker::{StopHandle, Worker};

/// Service-level error sink: `(service name, message)`.
pub type ErrorFn = fn(&str, &str);

/// Service-level hook.
pub type SvcFn<S> = fn(&mut SvcCtx<'_, S>);

/// Worker start hook. An `Err` aborts the worker.
pub type InitFn<S> = fn(&mut SvcCtx<'_, S>) -> std::result::Result<(), String>;

/// Reaped child hook.
pub type ReapFn<S> = fn(&mut SvcCtx<'_, S>, WaitStatus);

/// Callbacks a client starts with, and its teardown hooks.
pub struct Actions<U, S = ()> {
    pub on_readable: Option<Action<U, S>>,
    pub on_writable: Option<Action<U, S>>,
    /// Runs first on removal.
    pub on_done: Option<Action<U, S>>,
    /// Runs exactly once per client, after `on_done`, before the fd closes.
    pub on_finalize: Option<Action<U, S>>,
}

impl<U, S> Clone for Actions<U, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U, S> Copy for Actions<U, S> {}

impl<U, S> Default for Actions<U, S> {
    fn default() -> Self {
        Self {
            on_readable: None,
            on_writable: None,
            on_done: None,
            on_finalize: None,
        }
    }
}

impl<U, S> fmt::Debug for Actions<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actions")
            .field("on_readable", &self.on_readable.is_some())
            .field("on_writable", &self.on_writable.is_some())
            .field("on_done", &self.on_done.is_some())
            .field("on_finalize", &self.on_finalize.is_some())
            .finish()
    }
}

/// Settings in force for one worker, after service overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub nprocs: usize,
    pub nfds: usize,
    pub tick_slice: Duration,
    pub accept_timeout: Option<Duration>,
    pub max_aretries: usize,
    pub max_msg_size: usize,
}

/// What callbacks see of their service.
pub struct SvcCtx<'a, S> {
    name: &'a str,
    data: &'a mut S,
    nullfd: BorrowedFd<'a>,
    on_error: Option<ErrorFn>,
    max_msg_size: usize,
}

impl<'a, S> SvcCtx<'a, S> {
    pub(crate) fn new(
        name: &'a str,
        data: &'a mut S,
        nullfd: BorrowedFd<'a>,
        on_error: Option<ErrorFn>,
        max_msg_size: usize,
    ) -> Self {
        Self { name, data, nullfd, on_error, max_msg_size }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }

    #[inline]
    pub fn data(&self) -> &S {
        self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut S {
        self.data
    }

    /// The process-wide `/dev/null` handle.
    #[inline]
    pub fn nullfd(&self) -> BorrowedFd<'_> {
        self.nullfd
    }

    /// Payload limit for messages this service receives.
    #[inline]
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    /// Route an error to the service's error callback, or log it.
    pub fn report(&self, msg: impl fmt::Display) {
        report(self.name, self.on_error, &msg.to_string());
    }
}

pub(crate) fn report(name: &str, on_error: Option<ErrorFn>, msg: &str) {
    match on_error {
        Some(cb) => cb(name, msg),
        None => tracing::error!(svc = name, "{}", msg),
    }
}

/// One listener and everything its workers need.
pub struct Service<U, S = ()> {
    name: String,
    path: PathBuf,
    pub(crate) actions: Actions<U, S>,
    nprocs: Option<usize>,
    nfds: Option<usize>,
    tick_slice: Option<Duration>,
    accept_timeout: Option<Duration>,
    max_aretries: Option<usize>,
    pub(crate) on_svc_error: Option<ErrorFn>,
    pub(crate) on_reaped_child: Option<ReapFn<S>>,
    pub(crate) on_svc_tick: Option<SvcFn<S>>,
    pub(crate) mod_init: Option<InitFn<S>>,
    pub(crate) mod_fini: Option<SvcFn<S>>,
    pub(crate) data: S,
    pub(crate) listener: Option<Io>,
}

impl<U, S: Default> Service<U, S> {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_data(name, path, S::default())
    }
}

impl<U, S> Service<U, S> {
    pub fn with_data(name: impl Into<String>, path: impl Into<PathBuf>, data: S) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            actions: Actions::default(),
            nprocs: None,
            nfds: None,
            tick_slice: None,
            accept_timeout: None,
            max_aretries: None,
            on_svc_error: None,
            on_reaped_child: None,
            on_svc_tick: None,
            mod_init: None,
            mod_fini: None,
            data,
            listener: None,
        }
    }

    // Builder methods

    /// Entry point for a freshly accepted client.
    pub fn on_readable(mut self, cb: Action<U, S>) -> Self {
        self.actions.on_readable = Some(cb);
        self
    }

    /// Entry point for services that speak first. Ignored when
    /// `on_readable` is also set.
    pub fn on_writable(mut self, cb: Action<U, S>) -> Self {
        self.actions.on_writable = Some(cb);
        self
    }

    pub fn on_done(mut self, cb: Action<U, S>) -> Self {
        self.actions.on_done = Some(cb);
        self
    }

    pub fn on_finalize(mut self, cb: Action<U, S>) -> Self {
        self.actions.on_finalize = Some(cb);
        self
    }

    pub fn nprocs(mut self, n: usize) -> Self {
        self.nprocs = Some(n);
        self
    }

    pub fn nfds(mut self, n: usize) -> Self {
        self.nfds = Some(n);
        self
    }

    pub fn tick_slice(mut self, d: Duration) -> Self {
        self.tick_slice = Some(d);
        self
    }

    pub fn accept_timeout(mut self, d: Duration) -> Self {
        self.accept_timeout = Some(d);
        self
    }

    pub fn max_aretries(mut self, n: usize) -> Self {
        self.max_aretries = Some(n);
        self
    }

    pub fn on_svc_error(mut self, cb: ErrorFn) -> Self {
        self.on_svc_error = Some(cb);
        self
    }

    pub fn on_reaped_child(mut self, cb: ReapFn<S>) -> Self {
        self.on_reaped_child = Some(cb);
        self
    }

    pub fn on_svc_tick(mut self, cb: SvcFn<S>) -> Self {
        self.on_svc_tick = Some(cb);
        self
    }

    pub fn mod_init(mut self, cb: InitFn<S>) -> Self {
        self.mod_init = Some(cb);
        self
    }

    pub fn mod_fini(mut self, cb: SvcFn<S>) -> Self {
        self.mod_fini = Some(cb);
        self
    }

    // Accessors

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn actions(&self) -> Actions<U, S> {
        self.actions
    }

    #[inline]
    pub fn data(&self) -> &S {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut S {
        &mut self.data
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// Resolve settings against the framework configuration.
    pub fn limits(&self, cfg: &ServeConfig) -> Limits {
        let accept_timeout = self.accept_timeout.unwrap_or(cfg.accept_timeout);
        Limits {
            nprocs: self.nprocs.unwrap_or(cfg.nprocs),
            nfds: self.nfds.unwrap_or(cfg.nfds),
            tick_slice: self.tick_slice.unwrap_or(cfg.tick_slice),
            accept_timeout: (!accept_timeout.is_zero()).then_some(accept_timeout),
            max_aretries: self.max_aretries.unwrap_or(cfg.max_aretries),
            max_msg_size: cfg.max_msg_size,
        }
    }

    /// Create the listening socket. Binding twice is a no-op.
    pub fn bind(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listen = || -> eds_io::Result<Io> {
            let io = Io::listen_unix(&self.path, DEFAULT_BACKLOG)?;
            io.set_nonblock(true)?;
            Ok(io)
        };
        let io = listen().map_err(|source| EdsError::Listen {
            svc: self.name.clone(),
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(svc = %self.name, path = %self.path.display(), "listening");
        self.listener = Some(io);
        Ok(())
    }

    pub fn close_listener(&mut self) {
        self.listener = None;
    }

    /// Send `msg` to the error callback, or log it.
    pub fn report(&self, msg: &str) {
        report(&self.name, self.on_svc_error, msg);
    }

    pub(crate) fn ctx<'a>(&'a mut self, nullfd: BorrowedFd<'a>, max_msg_size: usize) -> SvcCtx<'a, S> {
        SvcCtx::new(&self.name, &mut self.data, nullfd, self.on_svc_error, max_msg_size)
    }
}

impl<U, S> fmt::Debug for Service<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("actions", &self.actions)
            .field("nprocs", &self.nprocs)
            .field("bound", &self.listener.is_some())
            .finish()
    }
}

/// Object-safe view of a `Service` for the process model, so services with
/// different user data types can be served together.
pub trait Serve {
    fn name(&self) -> &str;
    fn path(&self) -> &Path;
    fn nprocs(&self, cfg: &ServeConfig) -> usize;
    fn bind(&mut self) -> Result<()>;
    fn close_listener(&mut self);
    /// Run one worker loop until stopped.
    fn run_worker(&mut self, ctx: &ServeContext, stop: Option<StopHandle>) -> Result<()>;
    fn report(&self, msg: &str);
}

impl<U: Default, S> Serve for Service<U, S> {
    fn name(&self) -> &str {
        Service::name(self)
    }

    fn path(&self) -> &Path {
        Service::path(self)
    }

    fn nprocs(&self, cfg: &ServeConfig) -> usize {
        self.limits(cfg).nprocs
    }

    fn bind(&mut self) -> Result<()> {
        Service::bind(self)
    }

    fn close_listener(&mut self) {
        Service::close_listener(self)
    }

    fn run_worker(&mut self, ctx: &ServeContext, stop: Option<StopHandle>) -> Result<()> {
        let mut worker = Worker::new(self, ctx)?;
        if let Some(stop) = stop {
            worker.link_stop(stop);
        }
        worker.run()
    }

    fn report(&self, msg: &str) {
        Service::report(self, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    fn noop(_: &mut Client<u8>, _: &mut SvcCtx<'_, ()>) {}

    #[test]
    fn test_builder_and_limits() {
        let svc = Service::<u8>::new("echo", "/tmp/echo.sock")
            .on_readable(noop)
            .nprocs(3)
            .accept_timeout(Duration::from_millis(500));
        let cfg = ServeConfig::new().nprocs(1).nfds(16);
        let lim = svc.limits(&cfg);
        assert_eq!(lim.nprocs, 3);
        assert_eq!(lim.nfds, 16);
        assert_eq!(lim.accept_timeout, Some(Duration::from_millis(500)));
        assert!(svc.actions().on_readable.is_some());
        assert!(svc.actions().on_done.is_none());
        assert_eq!(Serve::name(&svc), "echo");
    }

    #[test]
    fn test_zero_accept_timeout_disables() {
        let svc = Service::<u8>::new("x", "/tmp/x.sock");
        let lim = svc.limits(&ServeConfig::new());
        assert_eq!(lim.accept_timeout, None);
    }

    #[test]
    fn test_bind_creates_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.sock");
        let mut svc = Service::<u8>::new("svc", &path);
        svc.bind().unwrap();
        svc.bind().unwrap();
        assert!(svc.is_bound());
        assert!(path.exists());
        svc.close_listener();
        assert!(!svc.is_bound());
    }

    #[test]
    fn test_bind_failure_names_service() {
        let mut svc = Service::<u8>::new("svc", "/nonexistent-dir/eds/svc.sock");
        let err = svc.bind().unwrap_err();
        assert!(matches!(err, EdsError::Listen { ref svc, .. } if svc == "svc"));
    }
}
