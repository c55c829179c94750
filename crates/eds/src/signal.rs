//! Process signal plumbing
//!
//! Handlers only touch atomics and write one byte to the registered wake
//! pipe, so a blocked `poll(2)` returns promptly. Everything else happens in
//! the loop that owns the pipe's read end.
//!
//! - Supervisor and foreground worker: SIGINT, SIGHUP and SIGTERM record the
//!   signal and wake; SIGPIPE is ignored.
//! - Forked workers: the stop signals go back to their default action.
//! - Workers with a reaped-child hook: SIGCHLD sets a flag and wakes.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{EdsError, Result};

static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static STOP_SIGNAL: AtomicI32 = AtomicI32::new(0);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

const STOP_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGHUP, Signal::SIGTERM];

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        unsafe fn errno_ptr() -> *mut libc::c_int {
            libc::__errno_location()
        }
    } else {
        unsafe fn errno_ptr() -> *mut libc::c_int {
            libc::__error()
        }
    }
}

fn wake() {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = 1u8;
        unsafe {
            let saved = *errno_ptr();
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
            *errno_ptr() = saved;
        }
    }
}

extern "C" fn handle_stop(sig: libc::c_int) {
    STOP_SIGNAL.store(sig, Ordering::Relaxed);
    wake();
}

extern "C" fn handle_sigchld(_sig: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::Relaxed);
    wake();
}

fn set_handler(sig: Signal, handler: SigHandler) -> Result<()> {
    // no SA_RESTART: a blocked poll or waitpid must see EINTR
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(sig, &action) }
        .map(|_| ())
        .map_err(|e| EdsError::sys("sigaction", e))
}

/// Route stop signals to the flag and wake pipe; ignore SIGPIPE.
pub fn install_stop_handlers() -> Result<()> {
    for sig in STOP_SIGNALS {
        set_handler(sig, SigHandler::Handler(handle_stop))?;
    }
    set_handler(Signal::SIGPIPE, SigHandler::SigIgn)
}

/// Restore default dispositions for the stop signals.
pub fn reset_stop_handlers() -> Result<()> {
    for sig in STOP_SIGNALS {
        set_handler(sig, SigHandler::SigDfl)?;
    }
    Ok(())
}

pub fn install_sigchld_handler() -> Result<()> {
    set_handler(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))
}

pub fn reset_sigchld_handler() -> Result<()> {
    set_handler(Signal::SIGCHLD, SigHandler::SigDfl)
}

/// Register the write end that handlers poke. `None` detaches.
pub fn set_wake_fd(fd: Option<RawFd>) {
    WAKE_FD.store(fd.unwrap_or(-1), Ordering::Relaxed);
}

#[inline]
pub fn stop_requested() -> bool {
    STOP_SIGNAL.load(Ordering::Relaxed) != 0
}

/// The last stop signal received, if any.
pub fn stop_signal() -> Option<Signal> {
    match STOP_SIGNAL.load(Ordering::Relaxed) {
        0 => None,
        sig => Signal::try_from(sig).ok(),
    }
}

/// Forget a recorded stop signal (fresh forked children).
pub fn clear_stop() {
    STOP_SIGNAL.store(0, Ordering::Relaxed);
}

/// True once per batch of SIGCHLD deliveries.
#[inline]
pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::Relaxed)
}

// ── Wake pipe ──

/// Non-blocking, close-on-exec pipe: `(read, write)`.
pub fn wake_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(EdsError::sys("pipe", Errno::last()));
    }
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [r.as_raw_fd(), w.as_raw_fd()] {
        let fl = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        let fdfl = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if fl < 0
            || fdfl < 0
            || unsafe { libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) } < 0
            || unsafe { libc::fcntl(fd, libc::F_SETFD, fdfl | libc::FD_CLOEXEC) } < 0
        {
            return Err(EdsError::sys("fcntl", Errno::last()));
        }
    }
    Ok((r, w))
}

/// Empty the read end of a wake pipe.
pub fn drain(fd: RawFd) {
    let mut sink = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, sink.as_mut_ptr() as *mut libc::c_void, sink.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Write one byte to a wake pipe. A full pipe already guarantees a wakeup.
pub fn poke(fd: RawFd) {
    let byte = 1u8;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_pipe_poke_drain() {
        let (r, w) = wake_pipe().unwrap();
        for _ in 0..100 {
            poke(w.as_raw_fd());
        }
        drain(r.as_raw_fd());
        let mut b = [0u8; 1];
        let n = unsafe { libc::read(r.as_raw_fd(), b.as_mut_ptr() as *mut libc::c_void, 1) };
        assert_eq!(n, -1);
        assert_eq!(Errno::last(), Errno::EAGAIN);
    }
}
