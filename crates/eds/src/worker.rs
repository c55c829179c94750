//! Worker event loop
//!
//! One `Worker` runs per worker process and multiplexes every client it has
//! accepted with a single `poll(2)`. Nothing here is shared with other
//! workers; the only common resource is the inherited listening socket,
//! and the kernel decides which worker's `accept` wins.
//!
//! Per loop iteration:
//!
//! 1. build the poll set: wake pipe, listener (unless the client table is
//!    full), then the readable and writable interest sets
//! 2. wait, bounded by the next tick and the earliest accept deadline
//! 3. dispatch readable clients, then writable ones, then clients armed
//!    with `Arm::Now`
//! 4. accept new connections
//! 5. expire accept deadlines and run tickers
//!
//! The interest sets are the single source of truth for what is polled.
//! They are brought in line with a client's state after every callback.

use std::collections::VecDeque;
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info, trace};

use eds_core::{FdSet, IdSet};
use eds_io::Io;

use crate::client::{Client, ClientState};
use crate::config::ConfigError;
use crate::context::ServeContext;
use crate::error::{EdsError, Result};
use crate::service::{Actions, Limits, Service};
use crate::signal;

const POLL_READ: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
const POLL_WRITE: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR;

// ── StopHandle ──

#[derive(Debug)]
struct StopInner {
    stopped: AtomicBool,
    rd: OwnedFd,
    wr: OwnedFd,
}

/// Asks a worker loop to finish. Cloneable and usable from other threads;
/// `stop` only stores a flag and writes one byte to a pipe.
#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub fn new() -> Result<Self> {
        let (rd, wr) = signal::wake_pipe()?;
        Ok(Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                rd,
                wr,
            }),
        })
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        signal::poke(self.inner.wr.as_raw_fd());
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn wake_fd(&self) -> RawFd {
        self.inner.rd.as_raw_fd()
    }

    fn notify_fd(&self) -> RawFd {
        self.inner.wr.as_raw_fd()
    }
}

// ── Worker ──

pub struct Worker<'s, U, S> {
    svc: &'s mut Service<U, S>,
    cx: &'s ServeContext,
    limits: Limits,
    ids: IdSet,
    clients: Vec<Option<Client<U, S>>>,
    /// fd -> client id
    fdmap: Vec<Option<usize>>,
    rfds: FdSet,
    wfds: FdSet,
    stop: StopHandle,
    accepting: bool,
    aretries: usize,
    next_tick: Option<Instant>,
    runq: VecDeque<usize>,
    pollfds: Vec<libc::pollfd>,
    ready: Vec<(usize, libc::c_short)>,
    started: bool,
    finished: bool,
    watching: bool,
}

impl<'s, U: Default, S> Worker<'s, U, S> {
    pub fn new(svc: &'s mut Service<U, S>, cx: &'s ServeContext) -> Result<Self> {
        let limits = svc.limits(&cx.config);
        let ids = IdSet::new(limits.nfds).ok_or(ConfigError::InvalidValue("nfds must be > 0"))?;
        let mut clients = Vec::with_capacity(limits.nfds);
        clients.resize_with(limits.nfds, || None);

        Ok(Self {
            svc,
            cx,
            limits,
            ids,
            clients,
            fdmap: Vec::new(),
            rfds: FdSet::new(),
            wfds: FdSet::new(),
            stop: StopHandle::new()?,
            accepting: true,
            aretries: 0,
            next_tick: None,
            runq: VecDeque::new(),
            pollfds: Vec::new(),
            ready: Vec::new(),
            started: false,
            finished: false,
            watching: false,
        })
    }

    /// Register a connection that did not come from the listener. The
    /// client starts in the state implied by `actions` and is torn down with
    /// its `on_done`/`on_finalize`.
    pub fn add_client(&mut self, io: Io, actions: Actions<U, S>) -> Result<usize> {
        if self.table_full() {
            return Err(EdsError::sys("add_client", Errno::EMFILE));
        }
        io.set_nonblock(true)?;
        let id = self.ids.use_next().ok_or_else(|| EdsError::sys("add_client", Errno::EMFILE))?;

        let state = match (actions.on_readable, actions.on_writable) {
            (Some(cb), _) => ClientState::Reading(cb),
            (None, Some(cb)) => ClientState::Writing(cb),
            (None, None) => ClientState::Idle,
        };
        let mut cli = Client::new(id, io, state, U::default());
        cli.hooks = actions;
        let fd = cli.fd();

        self.map_fd(fd, Some(id));
        self.clients[id] = Some(cli);
        self.sync_interest(id);
        trace!(svc = %self.svc.name(), fd, id, "client added");
        Ok(id)
    }

    /// Run the service's init hook. Called by `run`; in-process callers
    /// driving `poll_once` may call it themselves.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if let Some(init) = self.svc.mod_init {
            let nullfd = self.cx.nullfd.as_fd();
            let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
            init(&mut ctx).map_err(|msg| EdsError::Init {
                svc: ctx.name().to_string(),
                msg,
            })?;
        }
        Ok(())
    }

    /// Loop until the stop handle fires or a stop signal arrives.
    pub fn run(&mut self) -> Result<()> {
        signal::set_wake_fd(Some(self.stop.notify_fd()));
        let res = self.run_inner();
        self.shutdown();
        signal::set_wake_fd(None);
        res
    }

    fn run_inner(&mut self) -> Result<()> {
        if self.svc.on_reaped_child.is_some() {
            self.watch_children()?;
        }
        self.start()?;
        info!(svc = %self.svc.name(), pid = std::process::id(), "worker started");
        while !self.stop.is_stopped() && !signal::stop_requested() {
            // nothing left to serve and nothing can arrive
            if !self.accepting && self.nclients() == 0 {
                return Err(EdsError::ListenerLost {
                    svc: self.svc.name().to_string(),
                    failures: self.aretries,
                });
            }
            self.poll_once(None)?;
        }
        debug!(svc = %self.svc.name(), "worker stopping");
        Ok(())
    }

    /// Deliver SIGCHLD to this worker's reaped-child hook.
    pub fn watch_children(&mut self) -> Result<()> {
        signal::set_wake_fd(Some(self.stop.notify_fd()));
        signal::install_sigchld_handler()?;
        self.watching = true;
        Ok(())
    }

    /// One iteration of the loop. `max_wait` bounds the wait on top of the
    /// tick and deadline timers. Returns the number of ready descriptors.
    pub fn poll_once(&mut self, max_wait: Option<Duration>) -> Result<usize> {
        let now = Instant::now();
        self.arm_tick(now);
        let timer = [self.next_tick, self.earliest_deadline()]
            .into_iter()
            .flatten()
            .min()
            .map(|at| at.saturating_duration_since(now));
        let timeout = match (timer, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let listening = self.build_pollset();
        let nready = sys_poll(&mut self.pollfds, timeout)?;
        if nready > 0 {
            self.dispatch_ready(listening);
        }
        self.run_timers(Instant::now());
        Ok(nready)
    }

    fn build_pollset(&mut self) -> bool {
        let listener = match self.svc.listener.as_ref() {
            Some(l) if self.accepting && !self.table_full() => Some(l.fd()),
            _ => None,
        };

        self.pollfds.clear();
        self.pollfds.push(pollfd(self.stop.wake_fd(), libc::POLLIN));
        if let Some(fd) = listener {
            self.pollfds.push(pollfd(fd, libc::POLLIN));
        }
        for fd in self.rfds.iter() {
            self.pollfds.push(pollfd(fd, libc::POLLIN));
        }
        for fd in self.wfds.iter() {
            self.pollfds.push(pollfd(fd, libc::POLLOUT));
        }
        listener.is_some()
    }

    fn dispatch_ready(&mut self, listening: bool) {
        let fixed = if listening { 2 } else { 1 };

        if self.pollfds[0].revents != 0 {
            signal::drain(self.stop.wake_fd());
            if signal::take_child_exited() {
                self.reap_children();
            }
        }
        let accept = listening && self.pollfds[1].revents != 0;

        self.ready.clear();
        for pfd in &self.pollfds[fixed..] {
            if pfd.revents == 0 {
                continue;
            }
            if let Some(Some(id)) = self.fdmap.get(pfd.fd as usize) {
                self.ready.push((*id, pfd.revents));
            }
        }

        // ids freed below are not reused before accept runs
        let mut ready = std::mem::take(&mut self.ready);
        for (id, revents) in ready.iter_mut() {
            let id = *id;
            if *revents & libc::POLLNVAL != 0 {
                self.svc.report(&format!("client {}: descriptor no longer valid", id));
                self.remove_client(id);
                *revents = 0;
            } else if *revents & POLL_READ != 0 && self.state_of(id).is_some_and(|s| s.wants_read()) {
                self.dispatch(id);
                // one callback per client per readiness event
                *revents = 0;
            }
        }
        for &(id, revents) in &ready {
            if revents & POLL_WRITE != 0 && self.state_of(id).is_some_and(|s| s.wants_write()) {
                self.dispatch(id);
            }
        }
        self.ready = ready;
        self.run_queue();

        if accept {
            self.accept_ready();
        }
    }

    fn accept_ready(&mut self) {
        while self.accepting && !self.table_full() {
            let res = match self.svc.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };
            match res {
                Ok(Some(io)) => {
                    self.aretries = 0;
                    let actions = self.svc.actions;
                    match self.add_client(io, actions) {
                        Ok(id) => {
                            let deadline = self.limits.accept_timeout.map(|t| Instant::now() + t);
                            if let Some(cli) = self.clients[id].as_mut() {
                                cli.set_deadline(deadline);
                            }
                        }
                        Err(e) => self.svc.report(&format!("accept: {}", e)),
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    self.aretries += 1;
                    self.svc.report(&format!("accept: {}", e));
                    let max = self.limits.max_aretries;
                    if max != 0 && self.aretries >= max {
                        self.accepting = false;
                        self.svc.report(&format!(
                            "giving up on listener after {} failed accepts",
                            self.aretries
                        ));
                    }
                    return;
                }
            }
        }
    }
}

impl<'s, U, S> Worker<'s, U, S> {
    // ── Dispatch ──

    /// The client table is bounded by `nfds`, not by the id pool's size.
    #[inline]
    fn table_full(&self) -> bool {
        self.ids.used() >= self.limits.nfds
    }

    fn state_of(&self, id: usize) -> Option<ClientState<U, S>> {
        self.clients.get(id)?.as_ref().map(Client::state)
    }

    /// Run whatever the client's current state calls for, then settle it.
    fn dispatch(&mut self, id: usize) {
        let Some(cli) = self.clients.get_mut(id).and_then(Option::as_mut) else {
            return;
        };
        cli.take_run_now();
        let nullfd = self.cx.nullfd.as_fd();
        let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
        match cli.state() {
            ClientState::Reading(cb) | ClientState::Writing(cb) => cb(cli, &mut ctx),
            ClientState::Sending(_) => {
                if let Err(e) = cli.flush() {
                    if !e.is_peer_closed() {
                        ctx.report(format_args!("client {}: write: {}", id, e));
                    }
                }
            }
            ClientState::Idle | ClientState::Done => {}
        }
        self.settle(id);
    }

    /// Bring interest and bookkeeping in line with the client's state.
    fn settle(&mut self, id: usize) {
        let Some(cli) = self.clients.get(id).and_then(Option::as_ref) else {
            return;
        };
        let state = cli.state();
        if state.is_done() || (matches!(state, ClientState::Idle) && cli.ticker().is_none()) {
            self.remove_client(id);
            return;
        }
        if cli.run_now() {
            self.runq.push_back(id);
        }
        self.sync_interest(id);
    }

    /// Trampoline for `Arm::Now`.
    fn run_queue(&mut self) {
        while let Some(id) = self.runq.pop_front() {
            let armed = self.clients.get(id).and_then(Option::as_ref).is_some_and(Client::run_now);
            if armed {
                self.dispatch(id);
            }
        }
    }

    fn sync_interest(&mut self, id: usize) {
        let Some(cli) = self.clients.get(id).and_then(Option::as_ref) else {
            return;
        };
        let fd = cli.fd();
        let state = cli.state();
        if state.wants_read() {
            self.rfds.insert(fd);
        } else {
            self.rfds.remove(fd);
        }
        if state.wants_write() {
            self.wfds.insert(fd);
        } else {
            self.wfds.remove(fd);
        }
        debug_assert!(self.rfds.contains(fd) != self.wfds.contains(fd) || !(state.wants_read() || state.wants_write()));
    }

    /// True when every live client is polled for exactly what its state
    /// asks for, and nothing else is polled.
    pub fn interest_is_consistent(&self) -> bool {
        let mut nread = 0;
        let mut nwrite = 0;
        for cli in self.clients.iter().flatten() {
            let state = cli.state();
            if state.wants_read() && state.wants_write() {
                return false;
            }
            if self.rfds.contains(cli.fd()) != state.wants_read()
                || self.wfds.contains(cli.fd()) != state.wants_write()
            {
                return false;
            }
            nread += state.wants_read() as usize;
            nwrite += state.wants_write() as usize;
        }
        self.rfds.len() == nread && self.wfds.len() == nwrite
    }

    fn map_fd(&mut self, fd: RawFd, id: Option<usize>) {
        let idx = fd as usize;
        if idx >= self.fdmap.len() {
            if id.is_none() {
                return;
            }
            self.fdmap.resize(idx + 1, None);
        }
        self.fdmap[idx] = id;
    }

    // ── Teardown ──

    /// Remove a client: `on_done`, `on_finalize`, close (unless external),
    /// drop interest, release the id.
    pub fn remove_client(&mut self, id: usize) {
        let Some(mut cli) = self.clients.get_mut(id).and_then(Option::take) else {
            return;
        };
        let hooks = cli.hooks;
        {
            let nullfd = self.cx.nullfd.as_fd();
            let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
            if let Some(cb) = hooks.on_done {
                cb(&mut cli, &mut ctx);
            }
            if let Some(cb) = hooks.on_finalize {
                cb(&mut cli, &mut ctx);
            }
        }

        let fd = cli.fd();
        let external = cli.is_external_fd();
        let io = cli.into_io();
        if external {
            let _ = io.into_raw_fd();
        } else {
            drop(io);
        }
        self.rfds.remove(fd);
        self.wfds.remove(fd);
        self.map_fd(fd, None);
        self.ids.clear(id);
        trace!(svc = %self.svc.name(), fd, id, "client removed");
    }

    /// Remove every client and run the fini hook. Idempotent.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for id in 0..self.clients.len() {
            self.remove_client(id);
        }
        if self.started {
            if let Some(fini) = self.svc.mod_fini {
                let nullfd = self.cx.nullfd.as_fd();
                let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
                fini(&mut ctx);
            }
        }
        if self.watching {
            let _ = signal::reset_sigchld_handler();
            signal::set_wake_fd(None);
        }
    }

    // ── Timers ──

    fn arm_tick(&mut self, now: Instant) {
        if self.next_tick.is_some() {
            return;
        }
        let wanted = self.svc.on_svc_tick.is_some()
            || self.clients.iter().flatten().any(|c| c.ticker().is_some());
        if wanted {
            self.next_tick = Some(now + self.limits.tick_slice);
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.limits.accept_timeout?;
        self.clients.iter().flatten().filter_map(Client::deadline).min()
    }

    fn run_timers(&mut self, now: Instant) {
        if self.limits.accept_timeout.is_some() {
            for id in 0..self.clients.len() {
                let expired = self.clients[id]
                    .as_ref()
                    .and_then(Client::deadline)
                    .is_some_and(|at| at <= now);
                if expired {
                    self.svc.report(&format!("client {}: accept timeout", id));
                    self.remove_client(id);
                }
            }
        }

        if self.next_tick.is_some_and(|at| at <= now) {
            self.next_tick = None;
            self.tick();
            self.arm_tick(now);
        }
    }

    fn tick(&mut self) {
        for id in 0..self.clients.len() {
            let Some(cli) = self.clients[id].as_mut() else {
                continue;
            };
            let Some(ticker) = cli.ticker() else {
                continue;
            };
            let nullfd = self.cx.nullfd.as_fd();
            let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
            ticker(cli, &mut ctx);
            self.settle(id);
        }
        if let Some(cb) = self.svc.on_svc_tick {
            let nullfd = self.cx.nullfd.as_fd();
            let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
            cb(&mut ctx);
        }
        self.run_queue();
    }

    fn reap_children(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => {
                    debug!(svc = %self.svc.name(), ?status, "child reaped");
                    if let Some(cb) = self.svc.on_reaped_child {
                        let nullfd = self.cx.nullfd.as_fd();
                        let mut ctx = self.svc.ctx(nullfd, self.limits.max_msg_size);
                        cb(&mut ctx, status);
                    }
                }
            }
        }
    }

    // ── Accessors ──

    pub fn client(&self, id: usize) -> Option<&Client<U, S>> {
        self.clients.get(id)?.as_ref()
    }

    pub fn client_mut(&mut self, id: usize) -> Option<&mut Client<U, S>> {
        self.clients.get_mut(id)?.as_mut()
    }

    #[inline]
    pub fn nclients(&self) -> usize {
        self.ids.used()
    }

    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    #[inline]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn service(&self) -> &Service<U, S> {
        self.svc
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Replace the worker's stop handle with one created elsewhere.
    pub fn link_stop(&mut self, stop: StopHandle) {
        self.stop = stop;
    }
}

impl<'s, U, S> Drop for Worker<'s, U, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[inline]
fn pollfd(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd { fd, events, revents: 0 }
}

/// `poll(2)` with millisecond rounding up. EINTR counts as zero events.
fn sys_poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> Result<usize> {
    let ms = match timeout {
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, ms) };
    if ret < 0 {
        let errno = Errno::last();
        if errno == Errno::EINTR {
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
            }
            return Ok(0);
        }
        return Err(EdsError::Poll(errno));
    }
    Ok(ret as usize)
}
