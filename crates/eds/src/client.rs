//! Per-connection state
//!
//! A [`Client`] is created for every accepted socket and lives until the
//! worker removes it. What the worker does next for a client is decided by
//! exactly one [`ClientState`]:
//!
//! | state | interest | on readiness |
//! |---|---|---|
//! | `Reading(cb)` | readable | `cb` runs |
//! | `Writing(cb)` | writable | `cb` runs |
//! | `Sending(next)` | writable | framework flushes, then applies `next` |
//! | `Idle` | none | only the ticker can move it |
//! | `Done` | none | client is removed |
//!
//! Callbacks never block. Anything that would block re-arms (or keeps) the
//! current state and returns; all progress lives in the client's `udata`.
//!
//! ```ignore
//! fn on_request(cli: &mut Client<Echo>, ctx: &mut SvcCtx<'_, ()>) {
//!     match cli.recv_msg(|u| &mut u.msg) {
//!         Ok(Progress::Again) => {}
//!         Ok(Progress::Done(())) => {
//!             let _ = cli.send_msg(|u| &mut u.msg, Transition::Read(on_request));
//!         }
//!         Err(_) => cli.clear_actions(),
//!     }
//! }
//! ```

use std::fmt;
use std::os::fd::RawFd;
use std::time::Instant;

use eds_core::{Buffer, Message};
use eds_io::{Io, IoError, Progress, ReadOutcome, Received};

use crate::service::{Actions, SvcCtx};

/// Readiness callback.
pub type Action<U, S = ()> = fn(&mut Client<U, S>, &mut SvcCtx<'_, S>);

/// The descriptor belongs to someone else; removal must not close it.
pub const EXTERNAL_FD: u32 = 1 << 0;

/// When a newly armed callback first runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    /// In the same loop iteration, without waiting for readiness.
    Now,
    /// On the next readiness event.
    Defer,
}

/// State to enter once a framework send completes.
pub enum Transition<U, S = ()> {
    Read(Action<U, S>),
    Write(Action<U, S>),
    Idle,
    Done,
}

/// Where a client stands in its request/response cycle.
pub enum ClientState<U, S = ()> {
    Reading(Action<U, S>),
    Writing(Action<U, S>),
    Sending(Transition<U, S>),
    Idle,
    Done,
}

// fn pointers are Copy for every U and S; derives would demand U: Copy

impl<U, S> Clone for Transition<U, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U, S> Copy for Transition<U, S> {}

impl<U, S> Clone for ClientState<U, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U, S> Copy for ClientState<U, S> {}

impl<U, S> fmt::Debug for Transition<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Read(_) => "Read",
            Transition::Write(_) => "Write",
            Transition::Idle => "Idle",
            Transition::Done => "Done",
        })
    }
}

impl<U, S> fmt::Debug for ClientState<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Reading(_) => f.write_str("Reading"),
            ClientState::Writing(_) => f.write_str("Writing"),
            ClientState::Sending(next) => write!(f, "Sending({:?})", next),
            ClientState::Idle => f.write_str("Idle"),
            ClientState::Done => f.write_str("Done"),
        }
    }
}

impl<U, S> From<Transition<U, S>> for ClientState<U, S> {
    fn from(t: Transition<U, S>) -> Self {
        match t {
            Transition::Read(cb) => ClientState::Reading(cb),
            Transition::Write(cb) => ClientState::Writing(cb),
            Transition::Idle => ClientState::Idle,
            Transition::Done => ClientState::Done,
        }
    }
}

impl<U, S> ClientState<U, S> {
    /// Readiness the worker must poll for.
    #[inline]
    pub fn wants_read(&self) -> bool {
        matches!(self, ClientState::Reading(_))
    }

    #[inline]
    pub fn wants_write(&self) -> bool {
        matches!(self, ClientState::Writing(_) | ClientState::Sending(_))
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, ClientState::Done)
    }
}

/// Framework state for one connection plus the service's user data.
pub struct Client<U, S = ()> {
    id: usize,
    io: Io,
    state: ClientState<U, S>,
    ticker: Option<Action<U, S>>,
    flags: u32,
    wrbuf: Buffer,
    wroff: usize,
    run_now: bool,
    deadline: Option<Instant>,
    pub(crate) hooks: Actions<U, S>,
    pub udata: U,
}

impl<U, S> Client<U, S> {
    pub(crate) fn new(id: usize, io: Io, state: ClientState<U, S>, udata: U) -> Self {
        Self {
            id,
            io,
            state,
            ticker: None,
            flags: 0,
            wrbuf: Buffer::new(),
            wroff: 0,
            run_now: false,
            deadline: None,
            hooks: Actions::default(),
            udata,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.io.fd()
    }

    #[inline]
    pub fn io(&self) -> &Io {
        &self.io
    }

    #[inline]
    pub fn state(&self) -> ClientState<U, S> {
        self.state
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    // ── State changes ──

    /// Wait for readability, then run `cb`. During a framework send this
    /// replaces the pending transition instead.
    pub fn set_on_readable(&mut self, cb: Action<U, S>, arm: Arm) {
        self.enter(Transition::Read(cb), arm);
    }

    /// Wait for writability, then run `cb`.
    pub fn set_on_writable(&mut self, cb: Action<U, S>, arm: Arm) {
        self.enter(Transition::Write(cb), arm);
    }

    /// Drop both readiness callbacks. The client stays until its ticker
    /// moves it on; without a ticker it is removed.
    pub fn suspend(&mut self) {
        self.enter(Transition::Idle, Arm::Defer);
    }

    /// Finish the client. Pending framework output is flushed first.
    pub fn clear_actions(&mut self) {
        self.enter(Transition::Done, Arm::Defer);
    }

    /// Finish the client now, discarding pending output.
    pub fn abort(&mut self) {
        self.state = ClientState::Done;
        self.run_now = false;
        self.reset_output();
    }

    fn enter(&mut self, next: Transition<U, S>, arm: Arm) {
        match self.state {
            ClientState::Sending(_) => self.state = ClientState::Sending(next),
            ClientState::Done => {}
            _ => {
                self.state = next.into();
                self.run_now = arm == Arm::Now && !matches!(next, Transition::Idle | Transition::Done);
            }
        }
    }

    pub fn set_ticker(&mut self, ticker: Option<Action<U, S>>) {
        self.ticker = ticker;
    }

    #[inline]
    pub fn ticker(&self) -> Option<Action<U, S>> {
        self.ticker
    }

    /// Leave the descriptor open on removal.
    pub fn set_external_fd(&mut self) {
        self.flags |= EXTERNAL_FD;
    }

    #[inline]
    pub fn is_external_fd(&self) -> bool {
        self.flags & EXTERNAL_FD != 0
    }

    // ── I/O ──

    /// One non-blocking read into a buffer picked out of `udata`.
    pub fn read_buf(&mut self, pick: impl FnOnce(&mut U) -> &mut Buffer) -> eds_io::Result<ReadOutcome> {
        let out = self.io.read_buf(pick(&mut self.udata))?;
        if let ReadOutcome::Data(_) = out {
            self.deadline = None;
        }
        Ok(out)
    }

    /// Continue receiving one frame into a message picked out of `udata`.
    pub fn recv_msg(&mut self, pick: impl FnOnce(&mut U) -> &mut Message) -> eds_io::Result<Progress<()>> {
        let msg = pick(&mut self.udata);
        let res = eds_io::recv_msg(&self.io, msg);
        if !msg.frame().is_empty() {
            self.deadline = None;
        }
        res
    }

    /// Receive a passed descriptor (or the peer's errno in its place).
    pub fn recv_fd(&mut self) -> eds_io::Result<Progress<Received>> {
        let res = eds_io::recv_fd(&self.io)?;
        if let Progress::Done(_) = res {
            self.deadline = None;
        }
        Ok(res)
    }

    /// Queue `bytes` on the framework write buffer and enter `Sending`.
    /// Whatever the socket takes right away is written before returning;
    /// the rest goes out on writability, then `next` applies. On error the
    /// client is finished. A finished client stays finished and sends
    /// nothing.
    pub fn send(&mut self, bytes: &[u8], next: Transition<U, S>) -> eds_io::Result<()> {
        if self.state.is_done() {
            return Err(IoError::PeerClosed);
        }
        if let Err(e) = self.wrbuf.append(bytes) {
            self.abort();
            return Err(e.into());
        }
        self.state = ClientState::Sending(next);
        self.run_now = false;
        self.flush().map(|_| ())
    }

    /// `send` the complete frame of a message held in `udata`.
    pub fn send_msg(
        &mut self,
        pick: impl FnOnce(&mut U) -> &mut Message,
        next: Transition<U, S>,
    ) -> eds_io::Result<()> {
        if self.state.is_done() {
            return Err(IoError::PeerClosed);
        }
        let msg = pick(&mut self.udata);
        if let Err(e) = self.wrbuf.append(msg.frame()) {
            self.abort();
            return Err(e.into());
        }
        self.state = ClientState::Sending(next);
        self.run_now = false;
        self.flush().map(|_| ())
    }

    /// Bytes queued and not yet written.
    #[inline]
    pub fn pending_output(&self) -> usize {
        self.wrbuf.len() - self.wroff
    }

    /// Push queued output. `Done` once the buffer is empty and the pending
    /// transition has been applied.
    pub(crate) fn flush(&mut self) -> eds_io::Result<Progress<()>> {
        let ClientState::Sending(next) = self.state else {
            return Ok(Progress::Done(()));
        };
        while self.wroff < self.wrbuf.len() {
            match self.io.write_some(&self.wrbuf.as_slice()[self.wroff..]) {
                Ok(Progress::Done(0)) => {
                    self.abort();
                    return Err(IoError::PeerClosed);
                }
                Ok(Progress::Done(n)) => self.wroff += n,
                Ok(Progress::Again) => return Ok(Progress::Again),
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            }
        }
        self.reset_output();
        self.state = next.into();
        Ok(Progress::Done(()))
    }

    fn reset_output(&mut self) {
        self.wrbuf.clear();
        self.wroff = 0;
    }

    // ── Worker bookkeeping ──

    #[inline]
    pub(crate) fn take_run_now(&mut self) -> bool {
        std::mem::take(&mut self.run_now)
    }

    #[inline]
    pub(crate) fn run_now(&self) -> bool {
        self.run_now
    }

    #[inline]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, at: Option<Instant>) {
        self.deadline = at;
    }

    pub(crate) fn into_io(self) -> Io {
        self.io
    }
}

impl<U: fmt::Debug, S> fmt::Debug for Client<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("fd", &self.fd())
            .field("state", &self.state)
            .field("ticker", &self.ticker.is_some())
            .field("flags", &self.flags)
            .field("pending_output", &self.pending_output())
            .field("udata", &self.udata)
            .finish()
    }
}
