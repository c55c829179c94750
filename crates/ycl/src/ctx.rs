//! Blocking connection to an EDS service
//!
//! `YclCtx` wraps one UNIX socket. Its calls block until done even when
//! the descriptor is in non-blocking mode: on AGAIN they wait in `poll(2)`
//! for the needed readiness and retry.

use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::Path;

use eds_core::Message;
use eds_io::{Io, PassFd, Progress, Received};

use crate::error::{Result, YclError};

#[derive(Debug, Default)]
pub struct YclCtx {
    io: Option<Io>,
}

impl YclCtx {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_io(Io::connect_unix(path)?))
    }

    pub fn from_io(io: Io) -> Self {
        Self { io: Some(io) }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    pub fn io(&self) -> Result<&Io> {
        self.io.as_ref().ok_or(YclError::Closed)
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.io = None;
    }

    pub fn set_nonblock(&self, on: bool) -> Result<()> {
        Ok(self.io()?.set_nonblock(on)?)
    }

    /// Send the complete frame held in `msg`.
    pub fn send_msg(&self, msg: &mut Message) -> Result<()> {
        let io = self.io()?;
        msg.set_sendoff(0);
        while eds_io::send_msg(io, msg)?.is_again() {
            io.wait(libc::POLLOUT, None)?;
        }
        Ok(())
    }

    /// Receive one frame into `msg`, which is reset first.
    pub fn recv_msg(&self, msg: &mut Message) -> Result<()> {
        let io = self.io()?;
        msg.reset();
        while eds_io::recv_msg(io, msg)?.is_again() {
            io.wait(libc::POLLIN, None)?;
        }
        Ok(())
    }

    pub fn send_fd(&self, fd: BorrowedFd<'_>) -> Result<()> {
        self.send_pass(PassFd::Fd(fd))
    }

    /// Send an errno in place of a descriptor.
    pub fn send_errno(&self, code: i32) -> Result<()> {
        self.send_pass(PassFd::Err(code))
    }

    fn send_pass(&self, what: PassFd<'_>) -> Result<()> {
        let io = self.io()?;
        while eds_io::send_fd(io, what)?.is_again() {
            io.wait(libc::POLLOUT, None)?;
        }
        Ok(())
    }

    /// Receive a descriptor; a passed errno becomes an `Io` error.
    pub fn recv_fd(&self) -> Result<OwnedFd> {
        match self.recv_pass()? {
            Received::Fd(fd) => Ok(fd),
            Received::Err(code) => Err(YclError::Remote(std::io::Error::from_raw_os_error(code).to_string())),
        }
    }

    pub fn recv_pass(&self) -> Result<Received> {
        let io = self.io()?;
        loop {
            match eds_io::recv_fd(io)? {
                Progress::Done(r) => return Ok(r),
                Progress::Again => {
                    io.wait(libc::POLLIN, None)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn test_message_roundtrip_nonblocking() {
        let (a, b) = Io::pair().unwrap();
        let a = YclCtx::from_io(a);
        let b = YclCtx::from_io(b);
        a.set_nonblock(true).unwrap();
        b.set_nonblock(true).unwrap();

        let payload = vec![7u8; 300_000];
        let writer = std::thread::spawn(move || {
            let mut msg = Message::new();
            msg.create_raw(&payload).unwrap();
            a.send_msg(&mut msg).unwrap();
            a
        });
        let mut got = Message::new();
        b.recv_msg(&mut got).unwrap();
        assert_eq!(got.payload().len(), 300_000);
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_errno_instead_of_fd() {
        let (a, b) = Io::pair().unwrap();
        let (a, b) = (YclCtx::from_io(a), YclCtx::from_io(b));
        a.send_errno(libc::ECONNREFUSED).unwrap();
        let err = b.recv_fd().unwrap_err();
        assert!(matches!(err, YclError::Remote(_)));

        let null = std::fs::File::open("/dev/null").unwrap();
        a.send_fd(null.as_fd()).unwrap();
        b.recv_fd().unwrap();
    }

    #[test]
    fn test_closed() {
        let mut ctx = YclCtx::default();
        assert!(matches!(ctx.io(), Err(YclError::Closed)));
        ctx.close();
        assert!(!ctx.is_connected());
    }
}
