//! Process model
//!
//! [`serve`] is the daemon entry point: the calling process becomes a
//! supervisor that binds every listener, forks the configured number of
//! workers per service and keeps them running. Workers inherit the
//! listening sockets and nothing else; the supervisor never shares memory
//! with them.
//!
//! ```text
//! supervisor ── fork ──> worker (svc 0, child 0) ── Worker::run
//!     │        ── fork ──> worker (svc 0, child 1)
//!     │        ── fork ──> worker (svc 1, child 0)
//!     │
//!     └─ SIGCHLD -> reap -> restart after backoff
//!     └─ SIGINT/SIGHUP/SIGTERM -> forward, grace, SIGKILL, reap
//! ```
//!
//! A worker that exits before `restart_reset` has elapsed counts as a quick
//! exit: its slot waits `restart_backoff`, doubling per consecutive quick
//! exit up to `restart_backoff_max`. A zero backoff restarts immediately.
//!
//! [`serve_single`] runs one worker in the foreground without forking.

use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use eds_io::Io;

use crate::config::ServeConfig;
use crate::context::ServeContext;
use crate::error::{EdsError, Result};
use crate::service::Serve;
use crate::signal;

/// Poll period while waiting for workers to exit after a stop signal.
const REAP_POLL: Duration = Duration::from_millis(10);

/// One worker position: service index and child number within it.
#[derive(Debug)]
struct Slot {
    svc: usize,
    child: usize,
    pid: Option<Pid>,
    started: Instant,
    backoff: Duration,
    restart_at: Option<Instant>,
}

impl Slot {
    /// Schedule the next start after an exit at `now`.
    fn exited(&mut self, now: Instant, cfg: &ServeConfig) {
        self.pid = None;
        if cfg.restart_backoff.is_zero() {
            self.restart_at = Some(now);
            return;
        }
        if now.duration_since(self.started) >= cfg.restart_reset {
            self.backoff = cfg.restart_backoff;
        }
        self.restart_at = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(cfg.restart_backoff_max.max(cfg.restart_backoff));
    }
}

pub struct Supervisor<'a, 'b> {
    services: &'a mut [&'b mut dyn Serve],
    cx: &'a ServeContext,
    slots: Vec<Slot>,
    wake_rd: Option<Io>,
    wake_wr: Option<Io>,
}

impl<'a, 'b> Supervisor<'a, 'b> {
    /// Bind every listener and route signals to the supervisor's wake pipe.
    /// No worker is started yet.
    pub fn new(services: &'a mut [&'b mut dyn Serve], cx: &'a ServeContext) -> Result<Self> {
        cx.config.validate()?;
        for svc in services.iter_mut() {
            svc.bind()?;
        }

        let (rd, wr) = signal::wake_pipe()?;
        let (rd, wr) = (Io::from_owned(rd), Io::from_owned(wr));
        signal::set_wake_fd(Some(wr.fd()));
        signal::install_stop_handlers()?;
        signal::install_sigchld_handler()?;

        let now = Instant::now();
        let mut slots = Vec::new();
        for (i, svc) in services.iter().enumerate() {
            for child in 0..svc.nprocs(&cx.config).max(1) {
                slots.push(Slot {
                    svc: i,
                    child,
                    pid: None,
                    started: now,
                    backoff: cx.config.restart_backoff,
                    restart_at: Some(now),
                });
            }
        }

        Ok(Self {
            services,
            cx,
            slots,
            wake_rd: Some(rd),
            wake_wr: Some(wr),
        })
    }

    /// Supervise until a stop signal arrives, then bring every worker down.
    pub fn run(&mut self) -> Result<()> {
        info!(pid = std::process::id(), workers = self.slots.len(), "supervisor started");
        let res = self.run_inner();
        self.shutdown();
        res
    }

    fn run_inner(&mut self) -> Result<()> {
        while !signal::stop_requested() {
            signal::take_child_exited();
            self.reap();
            self.start_due()?;

            let timeout = self
                .slots
                .iter()
                .filter_map(|s| s.restart_at)
                .min()
                .map(|at| at.saturating_duration_since(Instant::now()));
            if let Some(rd) = self.wake_rd.as_ref() {
                if rd.wait(libc::POLLIN, timeout)? {
                    signal::drain(rd.fd());
                }
            }
        }
        Ok(())
    }

    /// Collect every exited worker without blocking.
    fn reap(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => return,
                Ok(status) => self.child_gone(status),
            }
        }
    }

    fn child_gone(&mut self, status: WaitStatus) {
        let Some(pid) = status.pid() else {
            return;
        };
        let Some(idx) = self.slots.iter().position(|s| s.pid == Some(pid)) else {
            debug!(%pid, ?status, "reaped unknown child");
            return;
        };
        let slot = &mut self.slots[idx];
        let svc = &self.services[slot.svc];
        match status {
            WaitStatus::Exited(_, code) => {
                svc.report(&format!("child:{} PID:{} exited (status: {})", slot.child, pid, code));
            }
            WaitStatus::Signaled(_, sig, _) => {
                svc.report(&format!("child:{} PID:{} terminated (signal: {})", slot.child, pid, sig as i32));
            }
            _ => return,
        }
        slot.exited(Instant::now(), &self.cx.config);
    }

    /// Fork every slot whose restart time has come.
    fn start_due(&mut self) -> Result<()> {
        let now = Instant::now();
        for idx in 0..self.slots.len() {
            if self.slots[idx].pid.is_none() && self.slots[idx].restart_at.is_some_and(|at| at <= now) {
                self.spawn(idx)?;
            }
        }
        Ok(())
    }

    fn spawn(&mut self, idx: usize) -> Result<()> {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                let slot = &mut self.slots[idx];
                debug!(svc = %self.services[slot.svc].name(), child = slot.child, pid = %child, "worker forked");
                slot.pid = Some(child);
                slot.started = Instant::now();
                slot.restart_at = None;
                Ok(())
            }
            Ok(ForkResult::Child) => self.become_worker(idx),
            Err(e) => Err(EdsError::Fork(e)),
        }
    }

    /// Child side of `spawn`. Never returns.
    fn become_worker(&mut self, idx: usize) -> ! {
        let svc_idx = self.slots[idx].svc;
        self.wake_rd = None;
        self.wake_wr = None;
        self.slots.clear();

        let prepared = (|| -> Result<()> {
            signal::set_wake_fd(None);
            signal::reset_sigchld_handler()?;
            signal::reset_stop_handlers()?;
            signal::clear_stop();
            signal::take_child_exited();
            for (i, svc) in self.services.iter_mut().enumerate() {
                if i != svc_idx {
                    svc.close_listener();
                }
            }
            self.cx.nullfd.redirect(libc::STDIN_FILENO)?;
            Ok(())
        })();

        let svc = &mut self.services[svc_idx];
        let res = prepared.and_then(|()| svc.run_worker(self.cx, None));
        let code = match res {
            Ok(()) => 0,
            Err(e) => {
                svc.report(&e.to_string());
                1
            }
        };
        std::process::exit(code)
    }

    /// Forward the stop signal, wait out the grace period, kill stragglers.
    fn shutdown(&mut self) {
        let sig = signal::stop_signal().unwrap_or(Signal::SIGTERM);
        let live: Vec<Pid> = self.slots.iter().filter_map(|s| s.pid).collect();
        info!(signal = %sig, workers = live.len(), "supervisor stopping");
        for pid in &live {
            let _ = kill(*pid, sig);
        }

        let deadline = Instant::now() + self.cx.config.shutdown_grace;
        while self.slots.iter().any(|s| s.pid.is_some()) && Instant::now() < deadline {
            self.reap_quiet(Some(WaitPidFlag::WNOHANG));
            if let Some(rd) = self.wake_rd.as_ref() {
                if let Ok(true) = rd.wait(libc::POLLIN, Some(REAP_POLL)) {
                    signal::drain(rd.fd());
                }
            }
        }

        for slot in self.slots.iter().filter(|s| s.pid.is_some()) {
            if let Some(pid) = slot.pid {
                warn!(%pid, "worker ignored {}, killing", sig);
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
        while self.slots.iter().any(|s| s.pid.is_some()) {
            if !self.reap_quiet(None) {
                break;
            }
        }

        let _ = signal::reset_sigchld_handler();
        let _ = signal::reset_stop_handlers();
        signal::set_wake_fd(None);
        for svc in self.services.iter_mut() {
            svc.close_listener();
            let _ = std::fs::remove_file(svc.path());
        }
    }

    /// Reap during shutdown: no restarts. False once there is nothing to wait for.
    fn reap_quiet(&mut self, flags: Option<WaitPidFlag>) -> bool {
        loop {
            match waitpid(Pid::from_raw(-1), flags) {
                Ok(WaitStatus::StillAlive) => return true,
                Ok(status) => {
                    if let Some(pid) = status.pid() {
                        for slot in self.slots.iter_mut().filter(|s| s.pid == Some(pid)) {
                            slot.pid = None;
                        }
                    }
                    if flags.is_none() {
                        return true;
                    }
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => return false,
            }
        }
    }

    /// PIDs of the running workers.
    pub fn pids(&self) -> Vec<Pid> {
        self.slots.iter().filter_map(|s| s.pid).collect()
    }
}

/// Bind, fork and supervise `services` until SIGINT, SIGHUP or SIGTERM.
pub fn serve(services: &mut [&mut dyn Serve], cx: &ServeContext) -> Result<()> {
    cx.logger.scope(|| Supervisor::new(services, cx)?.run())
}

/// Run one worker for `svc` in the calling process.
pub fn serve_single(svc: &mut dyn Serve, cx: &ServeContext) -> Result<()> {
    cx.logger.scope(|| {
        cx.config.validate()?;
        svc.bind()?;
        signal::install_stop_handlers()?;
        info!(svc = %svc.name(), "serving in foreground");
        let res = svc.run_worker(cx, None);
        let _ = signal::reset_stop_handlers();
        svc.close_listener();
        let _ = std::fs::remove_file(svc.path());
        res
    })
}

/// `serve_single` for the service called `name`.
pub fn serve_single_by_name(services: &mut [&mut dyn Serve], name: &str, cx: &ServeContext) -> Result<()> {
    let svc = services
        .iter_mut()
        .find(|s| s.name() == name)
        .ok_or_else(|| EdsError::NotFound(name.to_string()))?;
    serve_single(&mut **svc, cx)
}
